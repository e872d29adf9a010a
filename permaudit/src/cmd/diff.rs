use anyhow::Result;
use permaudit_api::{
    config::Config,
    entity::{permissions, roles},
    permission::{PermissionFilter, PermissionIndex, PermissionSet, RoleDiff, RoleRef},
    repair::{RepairMode, RepairPlan},
    report::DiffReport,
    sea_orm::DatabaseConnection,
    viewer::{PermissionViewer, RoleViewer},
};
use tracing::{debug, info};

use crate::{Cli, FilterArgs, OutputArgs};

/// Both roles with their comparison.
pub(super) struct Compared {
    pub reference: roles::Model,
    pub target: roles::Model,
    pub target_permissions: Vec<permissions::Model>,
    pub diff: RoleDiff,
    pub index: PermissionIndex,
}

pub(super) async fn compare(
    db: &DatabaseConnection,
    cfg: &Config,
    reference: Option<&str>,
    target: Option<&str>,
    filter: &PermissionFilter,
) -> Result<Compared> {
    let reference: RoleRef = reference.unwrap_or(cfg.roles.reference.as_str()).parse()?;
    let target: RoleRef = target.unwrap_or(cfg.roles.target.as_str()).parse()?;
    let reference = RoleViewer::resolve(db, &reference).await?;
    let target = RoleViewer::resolve(db, &target).await?;
    debug!(reference = reference.id, target = target.id, "Roles resolved");

    let reference_set = PermissionViewer::role_set(db, reference.id, filter).await?;
    let target_permissions = PermissionViewer::find_by_role(db, target.id, filter).await?;
    let target_set = PermissionSet::from_models(&target_permissions);
    let diff = RoleDiff::compute(&reference.code, &reference_set, &target.code, &target_set);
    let index = PermissionIndex::new(
        PermissionViewer::find_by_codes(db, &diff.missing.union(&diff.extra)).await?,
    );
    info!(
        reference = %reference.code,
        target = %target.code,
        missing = diff.missing.len(),
        extra = diff.extra.len(),
        "Roles compared"
    );
    Ok(Compared {
        reference,
        target,
        target_permissions,
        diff,
        index,
    })
}

pub async fn command(
    cli: &Cli,
    reference: Option<&str>,
    target: Option<&str>,
    sql: bool,
    filter: &FilterArgs,
    output: &OutputArgs,
) -> Result<u8> {
    let (cfg, db) = super::init(cli).await?;
    let c = compare(&db, &cfg, reference, target, &filter.into()).await?;
    db.close().await?;

    let report = DiffReport::build(&c.reference, &c.target, &c.diff, &c.index);
    let code = super::emit(&report, Some(&cfg), output)?;
    if sql {
        let plan = RepairPlan::build(
            c.reference,
            c.target,
            &c.diff,
            &c.index,
            &c.target_permissions,
            RepairMode::Grant,
            None,
        );
        println!("\n{}", plan.sql()?.trim_end());
    }
    Ok(code)
}
