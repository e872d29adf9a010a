use anyhow::Result;
use tracing::info;

use crate::Cli;

pub fn command(cli: &Cli) -> Result<u8> {
    let cfg = super::load_config(cli)?;
    info!(
        reference = %cfg.roles.reference,
        target = %cfg.roles.target,
        api = %cfg.api.base_url,
        frontend = %cfg.frontend.base_url,
        "Config file {:?} valid",
        cli.config
    );
    Ok(0)
}
