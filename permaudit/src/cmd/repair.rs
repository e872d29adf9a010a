use std::path::Path;

use anyhow::{Result, bail};
use permaudit_api::{
    permission::PermissionFilter,
    repair::{RepairMode, RepairPlan},
};
use tracing::{info, warn};

use crate::{Cli, FilterArgs, OutputArgs};

#[derive(Debug, Clone, Copy, Default)]
pub struct RepairArgs {
    pub sync: bool,
    pub apply: bool,
    pub grantor: Option<i32>,
}

pub async fn command(
    cli: &Cli,
    reference: Option<&str>,
    target: Option<&str>,
    opt: RepairArgs,
    filter: &FilterArgs,
    output: &OutputArgs,
) -> Result<u8> {
    let (cfg, db) = super::init(cli).await?;
    let filter: PermissionFilter = filter.into();
    let c = super::diff::compare(&db, &cfg, reference, target, &filter).await?;
    if c.reference.id == c.target.id {
        bail!("Reference and target are the same role `{}`", c.target.code);
    }
    let mode = if opt.sync {
        RepairMode::Sync
    } else {
        RepairMode::Grant
    };
    let plan = RepairPlan::build(
        c.reference,
        c.target,
        &c.diff,
        &c.index,
        &c.target_permissions,
        mode,
        opt.grantor,
    );
    for i in &plan.unresolved {
        warn!(code = %i, "Missing permission has no live row, skipped");
    }

    let code = super::emit(&plan, Some(&cfg), output)?;
    println!("\n{}", plan.sql()?.trim_end());
    if plan.is_empty() {
        info!(role = %plan.target.code, "Nothing to repair");
    } else if opt.apply {
        let out = plan
            .apply(&db, Path::new(&cfg.report.dir), &filter)
            .await?;
        info!(
            granted = out.granted,
            revoked = out.revoked,
            backup = %out.backup.display(),
            "Repair committed"
        );
    } else {
        info!("Dry run, pass --apply to execute");
    }
    db.close().await?;
    Ok(code)
}
