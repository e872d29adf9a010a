use std::{
    collections::{btree_set, BTreeMap, BTreeSet},
    convert::Infallible,
    fmt,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::entity::permissions::{self, PermissionType};

/// Ordered set of permission codes with set algebra.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(codes.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn from_models(models: &[permissions::Model]) -> Self {
        Self::from_codes(models.iter().map(|x| x.code.clone()))
    }

    /// Codes in `self` but not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        Self(self.0.difference(&other.0).cloned().collect())
    }

    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self(self.0.intersection(&other.0).cloned().collect())
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).cloned().collect())
    }

    #[must_use]
    pub fn symmetric_difference(&self, other: &Self) -> Self {
        Self(self.0.symmetric_difference(&other.0).cloned().collect())
    }

    #[must_use]
    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.0.is_disjoint(&other.0)
    }

    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::from_codes(iter)
    }
}

impl IntoIterator for PermissionSet {
    type Item = String;
    type IntoIter = btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Role reference given on the command line.
///
/// All-digit input is a numeric id, anything else is a role code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleRef {
    Id(i32),
    Code(String),
}

impl FromStr for RoleRef {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(s.parse::<i32>()
            .ok()
            .filter(|_| s.bytes().all(|b| b.is_ascii_digit()))
            .map_or_else(|| Self::Code(s.to_owned()), Self::Id))
    }
}

impl fmt::Display for RoleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(x) => write!(f, "#{x}"),
            Self::Code(x) => f.write_str(x),
        }
    }
}

/// Which permission rows take part in a comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionFilter {
    /// Also include rows with `status = 0`.
    pub include_disabled: bool,
    /// Restrict to one permission type.
    pub kind: Option<PermissionType>,
}

impl PermissionFilter {
    #[must_use]
    pub fn matches(&self, model: &permissions::Model) -> bool {
        model.deleted_at.is_none()
            && (self.include_disabled || model.is_enabled())
            && self.kind.is_none_or(|k| k == model.kind)
    }
}

/// Result of comparing a target role against a reference role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDiff {
    pub reference: String,
    pub target: String,
    /// Held by the reference, not by the target.
    pub missing: PermissionSet,
    /// Held by the target, not by the reference.
    pub extra: PermissionSet,
    pub common: PermissionSet,
}

impl RoleDiff {
    #[must_use]
    pub fn compute(
        reference: &str,
        reference_set: &PermissionSet,
        target: &str,
        target_set: &PermissionSet,
    ) -> Self {
        Self {
            reference: reference.to_owned(),
            target: target.to_owned(),
            missing: reference_set.difference(target_set),
            extra: target_set.difference(reference_set),
            common: reference_set.intersection(target_set),
        }
    }

    /// Target holds everything the reference holds.
    #[must_use]
    pub fn is_covered(&self) -> bool {
        self.missing.is_empty()
    }

    /// Both roles hold exactly the same codes.
    #[must_use]
    pub fn is_identical(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }

    /// Missing permissions grouped by type, unknown codes skipped.
    #[must_use]
    pub fn missing_by_type<'a>(
        &self,
        index: &'a PermissionIndex,
    ) -> BTreeMap<PermissionType, Vec<&'a permissions::Model>> {
        index.group_by_type(&self.missing)
    }
}

/// Live permission rows keyed by code.
///
/// Duplicated codes keep the row with the smallest id.
#[derive(Debug, Clone, Default)]
pub struct PermissionIndex(BTreeMap<String, permissions::Model>);

impl PermissionIndex {
    #[must_use]
    pub fn new(models: Vec<permissions::Model>) -> Self {
        let mut ret: BTreeMap<String, permissions::Model> = BTreeMap::new();
        for i in models {
            match ret.get(&i.code) {
                Some(x) if x.id <= i.id => {}
                _ => {
                    ret.insert(i.code.clone(), i);
                }
            }
        }
        Self(ret)
    }

    #[must_use]
    pub fn get(&self, code: &str) -> Option<&permissions::Model> {
        self.0.get(code)
    }

    /// Resolve every code of `set`, unknown codes are skipped.
    #[must_use]
    pub fn resolve(&self, set: &PermissionSet) -> Vec<&permissions::Model> {
        set.iter().filter_map(|x| self.get(x)).collect()
    }

    /// Resolve `set` grouped by permission type.
    #[must_use]
    pub fn group_by_type(
        &self,
        set: &PermissionSet,
    ) -> BTreeMap<PermissionType, Vec<&permissions::Model>> {
        let mut ret: BTreeMap<PermissionType, Vec<&permissions::Model>> = BTreeMap::new();
        for i in self.resolve(set) {
            ret.entry(i.kind).or_default().push(i);
        }
        ret
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(codes: &[&str]) -> PermissionSet {
        PermissionSet::from_codes(codes.iter().copied())
    }

    fn model(id: i32, code: &str, kind: PermissionType) -> permissions::Model {
        permissions::Model {
            id,
            code: code.to_owned(),
            name: code.to_lowercase(),
            kind,
            status: 1,
            ..Default::default()
        }
    }

    #[test]
    fn seed_admin_principal() {
        let admin = set(&["A", "B", "C"]);
        let principal = set(&["A"]);
        let diff = RoleDiff::compute("admin", &admin, "principal", &principal);
        assert_eq!(diff.missing.iter().collect::<Vec<_>>(), vec!["B", "C"]);
        assert!(diff.extra.is_empty());
        assert_eq!(diff.common, set(&["A"]));
        assert!(!diff.is_covered());
    }

    #[test]
    fn self_diff_is_empty() {
        let r = set(&["DASHBOARD", "STUDENTS", "CLASSES"]);
        let diff = RoleDiff::compute("admin", &r, "admin", &r);
        assert!(diff.is_identical());
        assert_eq!(diff.common, r);
    }

    #[test]
    fn opposite_diffs_partition_symmetric_difference() {
        let r1 = set(&["A", "B", "C", "E"]);
        let r2 = set(&["B", "D", "E", "F"]);
        let d12 = r1.difference(&r2);
        let d21 = r2.difference(&r1);
        assert!(d12.is_disjoint(&d21));
        assert_eq!(d12.union(&d21), r1.symmetric_difference(&r2));
        assert_eq!(d12, set(&["A", "C"]));
        assert_eq!(d21, set(&["D", "F"]));
    }

    #[test]
    fn applying_missing_covers_target() {
        let admin = set(&["A", "B", "C"]);
        let principal = set(&["A", "Z"]);
        let diff = RoleDiff::compute("admin", &admin, "principal", &principal);
        let repaired = principal.union(&diff.missing);
        let again = RoleDiff::compute("admin", &admin, "principal", &repaired);
        assert!(again.is_covered());
        assert_eq!(again.extra, set(&["Z"]));
    }

    #[test]
    fn role_ref_parse() {
        assert_eq!("2".parse::<RoleRef>().unwrap(), RoleRef::Id(2));
        assert_eq!(
            "principal".parse::<RoleRef>().unwrap(),
            RoleRef::Code("principal".to_owned())
        );
        assert_eq!(
            "+2".parse::<RoleRef>().unwrap(),
            RoleRef::Code("+2".to_owned())
        );
        assert_eq!(RoleRef::Id(7).to_string(), "#7");
    }

    #[test]
    fn filter_skips_disabled_and_deleted() {
        let mut disabled = model(1, "A", PermissionType::Menu);
        disabled.status = 0;
        let mut deleted = model(2, "B", PermissionType::Menu);
        deleted.deleted_at = Some(chrono::NaiveDateTime::default());
        let live = model(3, "C", PermissionType::Api);

        let f = PermissionFilter::default();
        assert!(!f.matches(&disabled));
        assert!(!f.matches(&deleted));
        assert!(f.matches(&live));

        let f = PermissionFilter {
            include_disabled: true,
            kind: Some(PermissionType::Menu),
        };
        assert!(f.matches(&disabled));
        assert!(!f.matches(&deleted));
        assert!(!f.matches(&live));
    }

    #[test]
    fn index_keeps_lowest_id_and_groups() {
        let index = PermissionIndex::new(vec![
            model(9, "DUP", PermissionType::Page),
            model(3, "DUP", PermissionType::Menu),
            model(4, "API_X", PermissionType::Api),
        ]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("DUP").unwrap().id, 3);

        let grouped = index.group_by_type(&set(&["DUP", "API_X", "UNKNOWN"]));
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&PermissionType::Menu][0].code, "DUP");
        assert_eq!(grouped[&PermissionType::Api][0].code, "API_X");
    }
}
