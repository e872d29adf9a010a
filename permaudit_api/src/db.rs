use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use tracing::debug;

use crate::{config::ConfigDatabase, Result};

/// Open a single database connection for one audit run.
///
/// # Errors
///
/// Will return `Err` for db error.
pub async fn connect(cfg: &ConfigDatabase) -> Result<DatabaseConnection> {
    let mut opt = ConnectOptions::new(cfg.dsn.clone());
    opt.max_connections(1)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(cfg.sql_log);
    let db = Database::connect(opt).await?;
    debug!(backend = ?db.get_database_backend(), "Database connected");
    Ok(db)
}
