use anyhow::{Result, bail};
use permaudit_api::{
    crawl::Crawler,
    menu::MenuTree,
    permission::{PermissionFilter, RoleRef},
    viewer::{PermissionViewer, RoleViewer},
};
use tracing::info;

use crate::{Cli, OutputArgs, Source};

pub async fn command(
    cli: &Cli,
    source: Source,
    role: Option<&str>,
    output: &OutputArgs,
) -> Result<u8> {
    let (cfg, tree, token) = match source {
        Source::Db => {
            let (cfg, db) = super::init(cli).await?;
            let filter = PermissionFilter::default();
            let rows = match role {
                Some(x) => {
                    let role = RoleViewer::resolve(&db, &x.parse::<RoleRef>()?).await?;
                    PermissionViewer::find_by_role(&db, role.id, &filter).await?
                }
                None => PermissionViewer::find_all(&db, &filter).await?,
            };
            db.close().await?;
            // pages behind auth need a token when a password is configured
            let token = if cfg.api.password.is_some() {
                super::login(&cfg).await?.token().map(ToOwned::to_owned)
            } else {
                None
            };
            (cfg, MenuTree::from_models(&rows), token)
        }
        Source::Api => {
            if role.is_some() {
                bail!("`--role` only applies to the db source, the api returns the login user's menu");
            }
            let cfg = super::load_config(cli)?;
            let client = super::login(&cfg).await?;
            let tree = MenuTree::from_api(&client.dynamic_routes().await?)?;
            let token = client.token().map(ToOwned::to_owned);
            (cfg, tree, token)
        }
    };

    let links = tree.links();
    info!(pages = links.len(), frontend = %cfg.frontend.base_url, "Crawl started");
    let report = Crawler::new(&cfg.frontend, &cfg.crawl)?
        .with_token(token)
        .crawl(&links)
        .await;
    super::emit(&report, Some(&cfg), output)
}
