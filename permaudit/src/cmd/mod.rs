use std::path::Path;

use anyhow::{Context, Result};
use migration::{Migrator, MigratorTrait};
use permaudit_api::{
    client::ApiClient,
    config::{self, Config},
    db,
    permission::PermissionFilter,
    report::{Report, ReportFormat},
    sea_orm::DatabaseConnection,
};
use tracing::{debug, info};

use crate::{Cli, FilterArgs, OutputArgs};

pub mod check;
pub mod crawl;
pub mod diff;
pub mod menus;
pub mod repair;
pub mod roles;
pub mod routes;

/// Exit code when `--strict` and findings are present.
pub const EXIT_FINDINGS: u8 = 2;

fn load_config(cli: &Cli) -> Result<Config> {
    let cfg = config::load_file(&cli.config)
        .with_context(|| format!("Load config file {:?}", cli.config))?;
    debug!("Config file {:?} loaded", cli.config);
    Ok(cfg)
}

async fn init(cli: &Cli) -> Result<(Config, DatabaseConnection)> {
    let mut cfg = load_config(cli)?;
    cfg.database.sql_log |= cli.verbose;
    let db = db::connect(&cfg.database)
        .await
        .context("Database connect failed")?;
    if cli.migrate {
        Migrator::up(&db, None).await.context("Migration failed")?;
        info!("Database migrated");
    }
    Ok((cfg, db))
}

async fn login(cfg: &Config) -> Result<ApiClient> {
    let password = cfg
        .api
        .password
        .as_deref()
        .context("`api.password` is required for the api source")?;
    let mut client = ApiClient::new(&cfg.api)?;
    client
        .login(&cfg.api.username, password)
        .await
        .with_context(|| format!("Login as `{}` failed", cfg.api.username))?;
    Ok(client)
}

impl From<&FilterArgs> for PermissionFilter {
    fn from(value: &FilterArgs) -> Self {
        Self {
            include_disabled: value.include_disabled,
            kind: value.kind,
        }
    }
}

/// Print `report` and write it to the report directory when a file format is chosen.
fn emit<R: Report>(report: &R, cfg: Option<&Config>, output: &OutputArgs) -> Result<u8> {
    println!("{}", report.console().trim_end());
    let format = output
        .format
        .or_else(|| cfg.map(|x| x.report.format))
        .unwrap_or_default();
    if format != ReportFormat::Console {
        let dir = cfg.map_or("reports", |x| x.report.dir.as_str());
        let path = report
            .write(Path::new(dir), format)
            .context("Write report failed")?;
        info!(path = %path.display(), %format, "Report written");
    }
    Ok(exit_code(report.findings(), output.strict))
}

const fn exit_code(findings: usize, strict: bool) -> u8 {
    if strict && findings != 0 {
        EXIT_FINDINGS
    } else {
        0
    }
}
