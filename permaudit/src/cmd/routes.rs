use std::path::Path;

use anyhow::{Context, Result};
use permaudit_api::routes::RouteScanner;

use crate::{Cli, OutputArgs};

pub fn command(cli: &Cli, index: &Path, dir: Option<&Path>, output: &OutputArgs) -> Result<u8> {
    // config is optional here, only report settings are used
    let cfg = super::load_config(cli).ok();
    let report = RouteScanner::new()?
        .scan(index, dir)
        .with_context(|| format!("Scan router index {index:?}"))?;
    super::emit(&report, cfg.as_ref(), output)
}
