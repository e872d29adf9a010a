use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
};

use chrono::Local;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    entity::{permissions, roles},
    permission::{PermissionFilter, PermissionIndex, PermissionSet, RoleDiff},
    report::{self, Report},
    utils::report_file_name,
    viewer::{PermissionViewer, RolePermissionViewer},
    AuditError, Result,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairMode {
    /// Only grant what the target is missing.
    #[default]
    Grant,
    /// Grant missing and revoke extra, target ends identical to reference.
    Sync,
}

impl fmt::Display for RepairMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Grant => "grant",
            Self::Sync => "sync",
        })
    }
}

/// Changes bringing a target role in line with a reference role.
#[derive(Debug, Clone, Serialize)]
pub struct RepairPlan {
    pub reference: roles::Model,
    pub target: roles::Model,
    pub mode: RepairMode,
    pub grantor: Option<i32>,
    pub grant: Vec<permissions::Model>,
    pub revoke: Vec<permissions::Model>,
    /// Missing codes without a live permission row.
    pub unresolved: Vec<String>,
}

impl RepairPlan {
    /// `target_permissions` are the rows the target currently holds, used to
    /// revoke every row of an extra code.
    #[must_use]
    pub fn build(
        reference: roles::Model,
        target: roles::Model,
        diff: &RoleDiff,
        index: &PermissionIndex,
        target_permissions: &[permissions::Model],
        mode: RepairMode,
        grantor: Option<i32>,
    ) -> Self {
        let grant: Vec<permissions::Model> =
            index.resolve(&diff.missing).into_iter().cloned().collect();
        let unresolved = diff
            .missing
            .iter()
            .filter(|x| index.get(x).is_none())
            .map(ToOwned::to_owned)
            .collect();
        let revoke = match mode {
            RepairMode::Grant => Vec::new(),
            RepairMode::Sync => target_permissions
                .iter()
                .filter(|x| diff.extra.contains(&x.code))
                .cloned()
                .collect(),
        };
        Self {
            reference,
            target,
            mode,
            grantor,
            grant,
            revoke,
            unresolved,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grant.is_empty() && self.revoke.is_empty()
    }

    /// Reviewable MySQL script of this plan.
    ///
    /// # Errors
    ///
    /// Will return `Err` when a statement cannot be built.
    pub fn sql(&self) -> Result<String> {
        let mut ret = format!(
            "-- Repair `{}` (id {}) from `{}` (id {}), mode {}\n-- {} grant(s), {} revoke(s), generated {}\n",
            self.target.code,
            self.target.id,
            self.reference.code,
            self.reference.id,
            self.mode,
            self.grant.len(),
            self.revoke.len(),
            Local::now().format("%Y-%m-%d %H:%M:%S"),
        );
        for i in &self.unresolved {
            ret.push_str(&format!("-- unresolved code: {i}\n"));
        }
        if self.is_empty() {
            ret.push_str("-- nothing to do\n");
            return Ok(ret);
        }
        ret.push_str("START TRANSACTION;\n");
        let grant: Vec<&permissions::Model> = self.grant.iter().collect();
        if let Some(x) = report::grant_sql(self.target.id, &grant, self.grantor)? {
            ret.push_str(&format!("{x}\n"));
        }
        let revoke: Vec<&permissions::Model> = self.revoke.iter().collect();
        if let Some(x) = report::revoke_sql(self.target.id, &revoke) {
            ret.push_str(&format!("{x}\n"));
        }
        ret.push_str("COMMIT;\n");
        Ok(ret)
    }

    /// Apply the plan in one transaction.
    ///
    /// A backup of the target links is written to `backup_dir` first. After the
    /// writes the roles are compared again under `filter` and the transaction is
    /// rolled back unless the comparison is clean.
    ///
    /// # Errors
    ///
    /// Will return `Err` for db or io error, or [`AuditError::RepairVerification`]
    /// when the comparison after the writes is not clean.
    pub async fn apply(
        &self,
        db: &DatabaseConnection,
        backup_dir: &Path,
        filter: &PermissionFilter,
    ) -> Result<RepairOutcome> {
        let links = RolePermissionViewer::find_by_role(db, self.target.id).await?;
        fs::create_dir_all(backup_dir)?;
        let backup = backup_dir.join(report_file_name(
            &format!("backup-{}", self.target.code),
            "sql",
            Local::now(),
        ));
        fs::write(&backup, report::backup_sql(&self.target, &links)?)?;
        info!(path = %backup.display(), rows = links.len(), "Backup written");

        let tx = db.begin().await?;
        let ids: Vec<i32> = self.grant.iter().map(|x| x.id).collect();
        let granted = RolePermissionViewer::grant(&tx, self.target.id, &ids, self.grantor).await?;
        let ids: Vec<i32> = self.revoke.iter().map(|x| x.id).collect();
        let revoked = RolePermissionViewer::revoke(&tx, self.target.id, &ids).await?;

        let reference = PermissionViewer::role_set(&tx, self.reference.id, filter).await?;
        let target = PermissionViewer::role_set(&tx, self.target.id, filter).await?;
        let diff = RoleDiff::compute(&self.reference.code, &reference, &self.target.code, &target);
        let left = match self.mode {
            RepairMode::Grant => diff.missing.len(),
            RepairMode::Sync => diff.missing.len() + diff.extra.len(),
        };
        if left != 0 {
            tx.rollback().await?;
            warn!(
                role = %self.target.code,
                missing = %join_codes(&diff.missing),
                extra = %join_codes(&diff.extra),
                "Repair verification failed"
            );
            return Err(AuditError::RepairVerification(left));
        }
        tx.commit().await?;
        info!(role = %self.target.code, granted, revoked, "Repair applied");
        Ok(RepairOutcome {
            granted,
            revoked,
            backup,
        })
    }
}

fn join_codes(set: &PermissionSet) -> String {
    set.iter().collect::<Vec<_>>().join(",")
}

impl Report for RepairPlan {
    fn kind(&self) -> &'static str {
        "repair"
    }

    fn findings(&self) -> usize {
        self.grant.len() + self.revoke.len()
    }

    fn console(&self) -> String {
        let mut ret = format!(
            "Repair `{}` from `{}` ({}): {} to grant, {} to revoke\n",
            self.target.code,
            self.reference.code,
            self.mode,
            self.grant.len(),
            self.revoke.len()
        );
        for i in &self.grant {
            ret.push_str(&format!("  + {} [{}] {}\n", i.code, i.kind, i.display_name()));
        }
        for i in &self.revoke {
            ret.push_str(&format!("  - {} [{}] {}\n", i.code, i.kind, i.display_name()));
        }
        if !self.unresolved.is_empty() {
            ret.push_str(&format!("Unresolved: {}\n", self.unresolved.join(", ")));
        }
        ret
    }

    fn markdown(&self) -> String {
        let sql = self.sql().unwrap_or_else(|e| format!("-- {e}\n"));
        format!(
            "# Repair plan: `{}` from `{}`\n\n{}\n```sql\n{}```\n",
            self.target.code,
            self.reference.code,
            self.console(),
            sql
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairOutcome {
    pub granted: u64,
    pub revoked: u64,
    /// Backup script of the target links before the repair.
    pub backup: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::permissions::PermissionType;

    fn model(id: i32, code: &str) -> permissions::Model {
        permissions::Model {
            id,
            code: code.to_owned(),
            name: code.to_owned(),
            kind: PermissionType::Menu,
            status: 1,
            ..Default::default()
        }
    }

    fn role(id: i32, code: &str) -> roles::Model {
        roles::Model {
            id,
            code: code.to_owned(),
            name: code.to_owned(),
            status: 1,
            ..Default::default()
        }
    }

    fn plan(mode: RepairMode) -> RepairPlan {
        let index = PermissionIndex::new(vec![model(1, "A"), model(2, "B"), model(4, "Z")]);
        let diff = RoleDiff::compute(
            "admin",
            &PermissionSet::from_codes(["A", "B", "GHOST"]),
            "principal",
            &PermissionSet::from_codes(["A", "Z"]),
        );
        RepairPlan::build(
            role(1, "admin"),
            role(2, "principal"),
            &diff,
            &index,
            &[model(1, "A"), model(4, "Z")],
            mode,
            None,
        )
    }

    #[test]
    fn grant_mode_keeps_extra() {
        let p = plan(RepairMode::Grant);
        assert_eq!(p.grant.iter().map(|x| x.id).collect::<Vec<_>>(), vec![2]);
        assert!(p.revoke.is_empty());
        assert_eq!(p.unresolved, vec!["GHOST".to_owned()]);
        assert_eq!(p.findings(), 1);
    }

    #[test]
    fn sync_mode_revokes_extra() {
        let p = plan(RepairMode::Sync);
        assert_eq!(p.revoke.iter().map(|x| x.id).collect::<Vec<_>>(), vec![4]);
        let sql = p.sql().unwrap();
        assert!(sql.contains("-- unresolved code: GHOST"));
        assert!(sql.contains("START TRANSACTION;"));
        assert!(sql.contains("INSERT INTO `role_permissions`"));
        assert!(sql.contains("DELETE FROM `role_permissions`"));
        assert!(sql.trim_end().ends_with("COMMIT;"));
    }

    #[test]
    fn empty_plan_sql() {
        let index = PermissionIndex::new(vec![model(1, "A")]);
        let s = PermissionSet::from_codes(["A"]);
        let diff = RoleDiff::compute("admin", &s, "principal", &s);
        let p = RepairPlan::build(
            role(1, "admin"),
            role(2, "principal"),
            &diff,
            &index,
            &[],
            RepairMode::Sync,
            None,
        );
        assert!(p.is_empty());
        assert!(p.sql().unwrap().contains("-- nothing to do"));
    }
}
