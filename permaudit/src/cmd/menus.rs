use anyhow::Result;
use permaudit_api::{
    config::Config, menu::MenuTree, permission::PermissionFilter, viewer::PermissionViewer,
};
use tracing::info;

use crate::{Cli, OutputArgs, Source};

async fn load(cli: &Cli, source: Source) -> Result<(Config, MenuTree)> {
    let (cfg, tree) = match source {
        Source::Db => {
            let (cfg, db) = super::init(cli).await?;
            // disabled rows still count as parents
            let filter = PermissionFilter {
                include_disabled: true,
                kind: None,
            };
            let rows = PermissionViewer::find_all(&db, &filter).await?;
            db.close().await?;
            (cfg, MenuTree::from_models(&rows))
        }
        Source::Api => {
            let cfg = super::load_config(cli)?;
            let client = super::login(&cfg).await?;
            let tree = MenuTree::from_api(&client.permissions().await?)?;
            (cfg, tree)
        }
    };
    info!(source = ?source, nodes = tree.nodes().len(), "Menu loaded");
    Ok((cfg, tree))
}

pub async fn command(cli: &Cli, source: Source, output: &OutputArgs) -> Result<u8> {
    let (cfg, tree) = load(cli, source).await?;
    let name = match source {
        Source::Db => "db",
        Source::Api => "api",
    };
    super::emit(&tree.check(name), Some(&cfg), output)
}
