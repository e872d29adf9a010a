use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::{Local, NaiveDateTime};
use sea_orm::{
    sea_query::{Expr, MysqlQueryBuilder, Query, SimpleExpr},
    DbErr,
};
use serde::{Deserialize, Serialize};

use crate::{
    entity::{
        permissions::{self, PermissionType},
        role_permissions, roles,
    },
    permission::{PermissionIndex, RoleDiff},
    utils::{md_escape, report_file_name},
    AuditError, Result,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Console,
    Markdown,
    Json,
}

impl ReportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Console => "txt",
            Self::Markdown => "md",
            Self::Json => "json",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "console" | "text" => Ok(Self::Console),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            _ => Err(AuditError::Config(format!("unknown report format `{s}`"))),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Console => "console",
            Self::Markdown => "markdown",
            Self::Json => "json",
        })
    }
}

/// A report that can be printed or written to disk.
pub trait Report: Serialize {
    /// Short kind used in file names, e.g. `diff`.
    fn kind(&self) -> &'static str;

    /// Plain text for the terminal.
    fn console(&self) -> String;

    /// Markdown document.
    fn markdown(&self) -> String;

    /// Number of findings, `0` means clean.
    fn findings(&self) -> usize;

    /// # Errors
    ///
    /// Will return `Err` when JSON serialization fails.
    fn render(&self, format: ReportFormat) -> Result<String> {
        Ok(match format {
            ReportFormat::Console => self.console(),
            ReportFormat::Markdown => self.markdown(),
            ReportFormat::Json => serde_json::to_string_pretty(self)?,
        })
    }

    /// Write the rendered report into `dir` with a timestamped name.
    ///
    /// # Errors
    ///
    /// Will return `Err` for io or serialization error.
    fn write(&self, dir: &Path, format: ReportFormat) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(report_file_name(
            self.kind(),
            format.extension(),
            Local::now(),
        ));
        fs::write(&path, self.render(format)?)?;
        Ok(path)
    }
}

/// Fixed width text table.
#[derive(Debug, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push<I, S>(&mut self, row: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(row.into_iter().map(Into::into).collect());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn widths(&self) -> Vec<usize> {
        let mut ret: Vec<usize> = self.headers.iter().map(|x| x.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = ret.get_mut(i) {
                    *w = (*w).max(cell.chars().count());
                }
            }
        }
        ret
    }

    #[must_use]
    pub fn render(&self) -> String {
        let widths = self.widths();
        let line = |cells: &[String]| {
            let mut s = String::new();
            for (i, w) in widths.iter().enumerate() {
                let cell = cells.get(i).map_or("", String::as_str);
                let pad = w - cell.chars().count().min(*w);
                s.push_str(cell);
                s.push_str(&" ".repeat(pad));
                if i + 1 < widths.len() {
                    s.push_str("  ");
                }
            }
            s.trim_end().to_owned()
        };
        let mut ret = line(&self.headers);
        ret.push('\n');
        let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        ret.push_str(&line(&sep));
        for row in &self.rows {
            ret.push('\n');
            ret.push_str(&line(row));
        }
        ret
    }

    #[must_use]
    pub fn markdown(&self) -> String {
        let mut ret = format!("| {} |\n", self.headers.join(" | "));
        ret.push_str(&format!(
            "|{}\n",
            self.headers.iter().map(|_| " --- |").collect::<String>()
        ));
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|x| md_escape(x)).collect();
            ret.push_str(&format!("| {} |\n", cells.join(" | ")));
        }
        ret
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleSummary {
    pub id: i32,
    pub code: String,
    pub name: String,
    pub total: usize,
}

impl RoleSummary {
    #[must_use]
    pub fn new(role: &roles::Model, total: usize) -> Self {
        Self {
            id: role.id,
            code: role.code.clone(),
            name: role.name.clone(),
            total,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PermissionRow {
    pub id: i32,
    pub code: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PermissionType,
    pub path: Option<String>,
}

impl From<&permissions::Model> for PermissionRow {
    fn from(value: &permissions::Model) -> Self {
        Self {
            id: value.id,
            code: value.code.clone(),
            name: value.display_name().to_owned(),
            kind: value.kind,
            path: value.path.clone(),
        }
    }
}

fn permission_table(rows: &[PermissionRow]) -> Table {
    let mut table = Table::new(["id", "code", "type", "name", "path"]);
    for i in rows {
        table.push([
            i.id.to_string(),
            i.code.clone(),
            i.kind.to_string(),
            i.name.clone(),
            i.path.clone().unwrap_or_default(),
        ]);
    }
    table
}

/// Reference vs target role comparison.
#[derive(Debug, Clone, Serialize)]
pub struct DiffReport {
    pub generated_at: NaiveDateTime,
    pub reference: RoleSummary,
    pub target: RoleSummary,
    pub missing: Vec<PermissionRow>,
    pub extra: Vec<PermissionRow>,
    pub common: usize,
    /// Missing count per permission type.
    pub missing_by_type: Vec<(PermissionType, usize)>,
}

impl DiffReport {
    #[must_use]
    pub fn build(
        reference: &roles::Model,
        target: &roles::Model,
        diff: &RoleDiff,
        index: &PermissionIndex,
    ) -> Self {
        let reference_total = diff.missing.len() + diff.common.len();
        let target_total = diff.extra.len() + diff.common.len();
        Self {
            generated_at: Local::now().naive_local(),
            reference: RoleSummary::new(reference, reference_total),
            target: RoleSummary::new(target, target_total),
            missing: index
                .resolve(&diff.missing)
                .into_iter()
                .map(Into::into)
                .collect(),
            extra: index
                .resolve(&diff.extra)
                .into_iter()
                .map(Into::into)
                .collect(),
            common: diff.common.len(),
            missing_by_type: diff
                .missing_by_type(index)
                .into_iter()
                .map(|(k, v)| (k, v.len()))
                .collect(),
        }
    }
}

impl Report for DiffReport {
    fn kind(&self) -> &'static str {
        "diff"
    }

    fn findings(&self) -> usize {
        self.missing.len()
    }

    fn console(&self) -> String {
        let mut ret = String::new();
        ret.push_str(&format!(
            "Reference `{}` ({}): {} permissions\n",
            self.reference.code,
            self.reference.name,
            self.reference.total,
        ));
        ret.push_str(&format!(
            "Target    `{}` ({}): {} permissions\n",
            self.target.code,
            self.target.name,
            self.target.total,
        ));
        ret.push_str(&format!(
            "Common: {}, missing: {}, extra: {}\n",
            self.common,
            self.missing.len(),
            self.extra.len(),
        ));
        if !self.missing_by_type.is_empty() {
            let by_type: Vec<String> = self
                .missing_by_type
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            ret.push_str(&format!("Missing by type: {}\n", by_type.join(", ")));
        }
        if !self.missing.is_empty() {
            ret.push_str(&format!("\nMissing in `{}`:\n", self.target.code));
            ret.push_str(&format!("{}\n", permission_table(&self.missing).render()));
        }
        if !self.extra.is_empty() {
            ret.push_str(&format!("\nOnly in `{}`:\n", self.target.code));
            ret.push_str(&format!("{}\n", permission_table(&self.extra).render()));
        }
        ret
    }

    fn markdown(&self) -> String {
        let mut ret = format!(
            "# Permission diff: `{}` vs `{}`\n\nGenerated at {}\n\n",
            self.reference.code,
            self.target.code,
            self.generated_at.format("%Y-%m-%d %H:%M:%S")
        );
        let mut summary = Table::new(["role", "name", "permissions"]);
        for i in [&self.reference, &self.target] {
            summary.push([i.code.clone(), i.name.clone(), i.total.to_string()]);
        }
        ret.push_str(&summary.markdown());
        ret.push_str(&format!(
            "\nCommon: **{}**, missing: **{}**, extra: **{}**\n",
            self.common,
            self.missing.len(),
            self.extra.len(),
        ));
        if !self.missing.is_empty() {
            ret.push_str(&format!("\n## Missing in `{}`\n\n", self.target.code));
            ret.push_str(&permission_table(&self.missing).markdown());
        }
        if !self.extra.is_empty() {
            ret.push_str(&format!("\n## Only in `{}`\n\n", self.target.code));
            ret.push_str(&permission_table(&self.extra).markdown());
        }
        ret
    }
}

fn sql_err(e: impl fmt::Display) -> AuditError {
    AuditError::Db(DbErr::Custom(e.to_string()))
}

/// `INSERT` granting `permissions` to role `role_id`, MySQL dialect.
///
/// # Errors
///
/// Will return `Err` when the statement cannot be built.
pub fn grant_sql(
    role_id: i32,
    permissions: &[&permissions::Model],
    grantor: Option<i32>,
) -> Result<Option<String>> {
    if permissions.is_empty() {
        return Ok(None);
    }
    let mut q = Query::insert();
    q.into_table(role_permissions::Entity).columns([
        role_permissions::Column::RoleId,
        role_permissions::Column::PermissionId,
        role_permissions::Column::GrantorId,
        role_permissions::Column::CreatedAt,
        role_permissions::Column::UpdatedAt,
    ]);
    for i in permissions {
        q.values([
            role_id.into(),
            i.id.into(),
            grantor.into(),
            Expr::cust("NOW()"),
            Expr::cust("NOW()"),
        ])
        .map_err(sql_err)?;
    }
    Ok(Some(format!("{};", q.to_string(MysqlQueryBuilder))))
}

/// `DELETE` revoking `permissions` from role `role_id`, MySQL dialect.
#[must_use]
pub fn revoke_sql(role_id: i32, permissions: &[&permissions::Model]) -> Option<String> {
    if permissions.is_empty() {
        return None;
    }
    let q = Query::delete()
        .from_table(role_permissions::Entity)
        .and_where(Expr::col(role_permissions::Column::RoleId).eq(role_id))
        .and_where(
            Expr::col(role_permissions::Column::PermissionId)
                .is_in(permissions.iter().map(|x| x.id)),
        )
        .to_owned();
    Some(format!("{};", q.to_string(MysqlQueryBuilder)))
}

/// Re-insertable snapshot of `links`, written before a repair is applied.
///
/// # Errors
///
/// Will return `Err` when the statement cannot be built.
pub fn backup_sql(role: &roles::Model, links: &[role_permissions::Model]) -> Result<String> {
    let mut ret = format!(
        "-- role_permissions backup of `{}` (id {}), {} rows, taken {}\n",
        role.code,
        role.id,
        links.len(),
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    let q = Query::delete()
        .from_table(role_permissions::Entity)
        .and_where(Expr::col(role_permissions::Column::RoleId).eq(role.id))
        .to_owned();
    ret.push_str(&format!("{};\n", q.to_string(MysqlQueryBuilder)));
    if links.is_empty() {
        return Ok(ret);
    }
    let mut q = Query::insert();
    q.into_table(role_permissions::Entity).columns([
        role_permissions::Column::Id,
        role_permissions::Column::RoleId,
        role_permissions::Column::PermissionId,
        role_permissions::Column::GrantorId,
        role_permissions::Column::CreatedAt,
        role_permissions::Column::UpdatedAt,
    ]);
    for i in links {
        let row: [SimpleExpr; 6] = [
            i.id.into(),
            i.role_id.into(),
            i.permission_id.into(),
            i.grantor_id.into(),
            i.created_at.into(),
            i.updated_at.into(),
        ];
        q.values(row).map_err(sql_err)?;
    }
    ret.push_str(&format!("{};\n", q.to_string(MysqlQueryBuilder)));
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PermissionSet;

    fn model(id: i32, code: &str, kind: PermissionType) -> permissions::Model {
        permissions::Model {
            id,
            code: code.to_owned(),
            name: code.to_lowercase(),
            kind,
            path: Some(format!("/{}", code.to_lowercase())),
            status: 1,
            ..Default::default()
        }
    }

    fn role(id: i32, code: &str) -> roles::Model {
        roles::Model {
            id,
            code: code.to_owned(),
            name: code.to_uppercase(),
            status: 1,
            ..Default::default()
        }
    }

    fn sample() -> DiffReport {
        let index = PermissionIndex::new(vec![
            model(1, "A", PermissionType::Category),
            model(2, "B", PermissionType::Menu),
            model(3, "C", PermissionType::Api),
            model(4, "Z", PermissionType::Menu),
        ]);
        let diff = RoleDiff::compute(
            "admin",
            &PermissionSet::from_codes(["A", "B", "C"]),
            "principal",
            &PermissionSet::from_codes(["A", "Z"]),
        );
        DiffReport::build(&role(1, "admin"), &role(2, "principal"), &diff, &index)
    }

    #[test]
    fn format_parse() {
        assert_eq!("MD".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert_eq!("json".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert!("xml".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn diff_report_counts() {
        let r = sample();
        assert_eq!(r.reference.total, 3);
        assert_eq!(r.target.total, 2);
        assert_eq!(r.common, 1);
        assert_eq!(r.findings(), 2);
        let codes: Vec<&str> = r.missing.iter().map(|x| x.code.as_str()).collect();
        assert_eq!(codes, vec!["B", "C"]);
        assert_eq!(r.extra[0].code, "Z");
        assert_eq!(
            r.missing_by_type,
            vec![(PermissionType::Menu, 1), (PermissionType::Api, 1)]
        );
    }

    #[test]
    fn diff_report_renders() {
        let r = sample();
        let text = r.console();
        assert!(text.contains("Common: 1, missing: 2, extra: 1"));
        assert!(text.contains("Missing in `principal`"));
        let md = r.markdown();
        assert!(md.starts_with("# Permission diff: `admin` vs `principal`"));
        assert!(md.contains("| 2 | B | menu | b | /b |"));
        let json: serde_json::Value =
            serde_json::from_str(&r.render(ReportFormat::Json).unwrap()).unwrap();
        assert_eq!(json["missing"][1]["type"], "api");
    }

    #[test]
    fn report_written_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample().write(dir.path(), ReportFormat::Markdown).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("diff-"));
        assert_eq!(path.extension().unwrap(), "md");
        assert!(fs::read_to_string(path).unwrap().contains("Missing in"));
    }

    #[test]
    fn table_aligns_columns() {
        let mut t = Table::new(["code", "name"]);
        t.push(["A", "long name"]);
        t.push(["LONGER", "x"]);
        let out = t.render();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "code    name");
        assert_eq!(lines[1], "------  ---------");
        assert_eq!(lines[2], "A       long name");
        assert_eq!(lines[3], "LONGER  x");
    }

    #[test]
    fn grant_sql_escapes_and_batches() {
        let b = model(2, "B", PermissionType::Menu);
        let c = model(3, "C", PermissionType::Api);
        let sql = grant_sql(5, &[&b, &c], Some(1)).unwrap().unwrap();
        assert!(sql.starts_with("INSERT INTO `role_permissions`"));
        assert!(sql.contains("(5, 2, 1, NOW(), NOW())"));
        assert!(sql.contains("(5, 3, 1, NOW(), NOW())"));
        assert!(grant_sql(5, &[], None).unwrap().is_none());

        let sql = grant_sql(5, &[&b], None).unwrap().unwrap();
        assert!(sql.contains("(5, 2, NULL, NOW(), NOW())"));
    }

    #[test]
    fn revoke_sql_targets_role() {
        let z = model(4, "Z", PermissionType::Menu);
        let sql = revoke_sql(2, &[&z]).unwrap();
        assert!(sql.starts_with("DELETE FROM `role_permissions`"));
        assert!(sql.contains("WHERE `role_id` = 2 AND `permission_id` IN (4)"));
        assert!(revoke_sql(2, &[]).is_none());
    }

    #[test]
    fn backup_sql_restores_rows() {
        let links = vec![role_permissions::Model {
            id: 10,
            role_id: 2,
            permission_id: 1,
            grantor_id: None,
            ..Default::default()
        }];
        let sql = backup_sql(&role(2, "principal"), &links).unwrap();
        assert!(sql.contains("DELETE FROM `role_permissions` WHERE `role_id` = 2;"));
        assert!(sql.contains("INSERT INTO `role_permissions`"));
        assert!(sql.contains("(10, 2, 1, NULL, '1970-01-01"));
    }
}
