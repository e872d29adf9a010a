use anyhow::Result;
use permaudit_api::{
    permission::PermissionFilter,
    report::Table,
    viewer::{PermissionViewer, RoleViewer},
};

use crate::Cli;

pub async fn command(cli: &Cli) -> Result<u8> {
    let (_, db) = super::init(cli).await?;
    let filter = PermissionFilter::default();
    let mut table = Table::new(["id", "code", "name", "status", "permissions"]);
    for i in RoleViewer::find_all(&db).await? {
        let cnt = PermissionViewer::find_by_role(&db, i.id, &filter).await?.len();
        table.push([
            i.id.to_string(),
            i.code,
            i.name,
            i.status.to_string(),
            cnt.to_string(),
        ]);
    }
    println!("{}", table.render());
    println!("{} roles", RoleViewer::count(&db).await?);
    db.close().await?;
    Ok(0)
}
