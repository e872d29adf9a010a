use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use serde_json::Value;

use crate::{
    entity::permissions::{self, PermissionType, STATUS_ENABLED},
    report::{Report, Table},
    utils::join_route,
    AuditError, Result,
};

/// A permission row as seen by the menu checker, from the database or the API.
#[serde_inline_default]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuNode {
    #[serde(default)]
    pub id: i32,
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub chinese_name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: PermissionType,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub parent_id: Option<i32>,
    #[serde(default)]
    pub sort: i32,
    #[serde_inline_default(STATUS_ENABLED)]
    pub status: i32,
}

impl MenuNode {
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.chinese_name
            .as_deref()
            .filter(|x| !x.is_empty())
            .unwrap_or(&self.name)
    }

    fn live_path(&self) -> Option<&str> {
        self.path.as_deref().map(str::trim).filter(|x| !x.is_empty())
    }
}

impl From<&permissions::Model> for MenuNode {
    fn from(value: &permissions::Model) -> Self {
        Self {
            id: value.id,
            code: value.code.clone(),
            name: value.name.clone(),
            chinese_name: value.chinese_name.clone(),
            kind: value.kind,
            path: value.path.clone(),
            component: value.component.clone(),
            parent_id: value.parent_id,
            sort: value.sort,
            status: value.status,
        }
    }
}

/// Short reference to a node in findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRef {
    pub id: i32,
    pub code: String,
    pub name: String,
    pub path: Option<String>,
}

impl From<&MenuNode> for NodeRef {
    fn from(value: &MenuNode) -> Self {
        Self {
            id: value.id,
            code: value.code.clone(),
            name: value.display_name().to_owned(),
            path: value.path.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub key: String,
    pub nodes: Vec<NodeRef>,
}

/// A page the sidebar links to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuLink {
    pub code: String,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Default)]
pub struct MenuTree {
    nodes: Vec<MenuNode>,
}

impl MenuTree {
    #[must_use]
    pub fn new(mut nodes: Vec<MenuNode>) -> Self {
        nodes.sort_by_key(|x| (x.sort, x.id));
        Self { nodes }
    }

    #[must_use]
    pub fn from_models(models: &[permissions::Model]) -> Self {
        Self::new(models.iter().map(Into::into).collect())
    }

    /// Build from an API payload.
    ///
    /// Accepts a flat list, an object holding the list under `routes`,
    /// `permissions`, `list`, `items` or `rows`, and nested `children` trees.
    /// Relative paths in a tree are resolved against the parent path.
    ///
    /// # Errors
    ///
    /// Will return `Err` when no node list is found or a node is malformed.
    pub fn from_api(data: &Value) -> Result<Self> {
        let list = match data {
            Value::Array(x) => x,
            Value::Object(x) => ["routes", "permissions", "list", "items", "rows"]
                .iter()
                .find_map(|k| x.get(*k).and_then(Value::as_array))
                .ok_or_else(|| AuditError::api("menu", "no permission list in payload"))?,
            _ => return Err(AuditError::api("menu", "payload is not a list")),
        };
        let mut nodes = Vec::new();
        flatten(list, None, &mut nodes)?;
        Ok(Self::new(nodes))
    }

    #[must_use]
    pub fn nodes(&self) -> &[MenuNode] {
        &self.nodes
    }

    fn live(&self) -> impl Iterator<Item = &MenuNode> {
        self.nodes.iter().filter(|x| x.status == STATUS_ENABLED)
    }

    fn group_by<'a, F>(&'a self, key: F) -> Vec<DuplicateGroup>
    where
        F: Fn(&'a MenuNode) -> Option<&'a str>,
    {
        let mut groups: BTreeMap<&str, Vec<&MenuNode>> = BTreeMap::new();
        for i in self.live() {
            if let Some(k) = key(i) {
                groups.entry(k).or_default().push(i);
            }
        }
        groups
            .into_iter()
            .filter(|(_, v)| v.len() > 1)
            .map(|(k, v)| DuplicateGroup {
                key: k.to_owned(),
                nodes: v.into_iter().map(Into::into).collect(),
            })
            .collect()
    }

    /// Run every consistency check.
    #[must_use]
    pub fn check(&self, source: &str) -> MenuReport {
        let ids: HashSet<i32> = self.nodes.iter().map(|x| x.id).collect();
        let mut children: HashMap<i32, usize> = HashMap::new();
        for i in self.live() {
            if let Some(p) = i.parent_id {
                *children.entry(p).or_default() += 1;
            }
        }
        let has_children = |id: i32| children.get(&id).copied().unwrap_or_default() > 0;

        MenuReport {
            source: source.to_owned(),
            total: self.nodes.len(),
            duplicate_paths: self.group_by(|x| {
                if x.kind.is_navigable() {
                    x.live_path()
                } else {
                    None
                }
            }),
            duplicate_codes: self.group_by(|x| Some(x.code.as_str())),
            orphans: self
                .live()
                .filter(|x| x.parent_id.is_some_and(|p| p != 0 && !ids.contains(&p)))
                .map(Into::into)
                .collect(),
            empty_categories: self
                .live()
                .filter(|x| x.kind == PermissionType::Category && !has_children(x.id))
                .map(Into::into)
                .collect(),
            missing_component: self
                .live()
                .filter(|x| {
                    x.kind == PermissionType::Menu
                        && !has_children(x.id)
                        && x.component.as_deref().is_none_or(|c| c.trim().is_empty())
                })
                .map(Into::into)
                .collect(),
        }
    }

    /// Distinct crawlable sidebar links, in menu order.
    ///
    /// Paths with route parameters are skipped.
    #[must_use]
    pub fn links(&self) -> Vec<MenuLink> {
        let mut seen = HashSet::new();
        self.live()
            .filter(|x| x.kind.is_navigable())
            .filter_map(|x| x.live_path().map(|p| (x, p)))
            .filter(|(_, p)| !p.contains(':') && !p.starts_with("http"))
            .filter(|(_, p)| seen.insert(p.to_string()))
            .map(|(x, p)| MenuLink {
                code: x.code.clone(),
                name: x.display_name().to_owned(),
                path: p.to_owned(),
            })
            .collect()
    }
}

/// `true` for a router path relative to its parent, e.g. `dashboard`.
fn is_relative(path: &str) -> bool {
    !path.is_empty() && !path.starts_with('/') && !path.starts_with("http")
}

fn flatten(
    list: &[Value],
    parent: Option<(i32, &str)>,
    out: &mut Vec<MenuNode>,
) -> Result<()> {
    for i in list {
        let mut v = i.clone();
        let children = v
            .as_object_mut()
            .and_then(|x| x.remove("children"))
            .unwrap_or_default();
        let mut node: MenuNode = serde_json::from_value(v)?;
        if node.parent_id.is_none() {
            node.parent_id = parent.map(|(id, _)| id);
        }
        if let Some(p) = node.live_path().filter(|x| is_relative(x)) {
            let base = parent.map_or("", |(_, x)| x);
            node.path = Some(join_route(base, p));
        }
        let id = node.id;
        let path = node.path.clone().unwrap_or_default();
        out.push(node);
        if let Value::Array(x) = children {
            flatten(&x, Some((id, &path)), out)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct MenuReport {
    pub source: String,
    pub total: usize,
    pub duplicate_paths: Vec<DuplicateGroup>,
    pub duplicate_codes: Vec<DuplicateGroup>,
    pub orphans: Vec<NodeRef>,
    pub empty_categories: Vec<NodeRef>,
    pub missing_component: Vec<NodeRef>,
}

impl MenuReport {
    fn sections(&self) -> Vec<(&'static str, Table)> {
        let mut ret = Vec::new();
        for (title, groups) in [
            ("Duplicate paths", &self.duplicate_paths),
            ("Duplicate codes", &self.duplicate_codes),
        ] {
            let mut t = Table::new(["key", "id", "code", "name"]);
            for g in groups {
                for n in &g.nodes {
                    t.push([g.key.clone(), n.id.to_string(), n.code.clone(), n.name.clone()]);
                }
            }
            ret.push((title, t));
        }
        for (title, nodes) in [
            ("Orphaned parent", &self.orphans),
            ("Empty categories", &self.empty_categories),
            ("Menus without component", &self.missing_component),
        ] {
            let mut t = Table::new(["id", "code", "name", "path"]);
            for n in nodes {
                t.push([
                    n.id.to_string(),
                    n.code.clone(),
                    n.name.clone(),
                    n.path.clone().unwrap_or_default(),
                ]);
            }
            ret.push((title, t));
        }
        ret
    }
}

impl Report for MenuReport {
    fn kind(&self) -> &'static str {
        "menus"
    }

    fn findings(&self) -> usize {
        self.duplicate_paths.len()
            + self.duplicate_codes.len()
            + self.orphans.len()
            + self.empty_categories.len()
            + self.missing_component.len()
    }

    fn console(&self) -> String {
        let mut ret = format!(
            "Menu source {}: {} nodes, {} findings\n",
            self.source,
            self.total,
            self.findings()
        );
        for (title, t) in self.sections() {
            if !t.is_empty() {
                ret.push_str(&format!("\n{title}:\n{}\n", t.render()));
            }
        }
        ret
    }

    fn markdown(&self) -> String {
        let mut ret = format!(
            "# Menu consistency\n\nSource `{}`: {} nodes, **{}** findings\n",
            self.source,
            self.total,
            self.findings()
        );
        for (title, t) in self.sections() {
            if !t.is_empty() {
                ret.push_str(&format!("\n## {title}\n\n{}", t.markdown()));
            }
        }
        ret
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn node(
        id: i32,
        code: &str,
        kind: PermissionType,
        path: Option<&str>,
        parent_id: Option<i32>,
    ) -> MenuNode {
        MenuNode {
            id,
            code: code.to_owned(),
            name: code.to_lowercase(),
            kind,
            path: path.map(ToOwned::to_owned),
            component: Some("views/x.vue".to_owned()),
            parent_id,
            status: STATUS_ENABLED,
            ..Default::default()
        }
    }

    fn sample() -> MenuTree {
        let mut no_component = node(5, "ENROLL", PermissionType::Menu, Some("/enroll"), Some(1));
        no_component.component = None;
        let mut disabled = node(8, "OLD", PermissionType::Menu, Some("/students"), Some(1));
        disabled.status = 0;
        MenuTree::new(vec![
            node(1, "CENTER", PermissionType::Category, Some("/center"), None),
            node(2, "STUDENTS", PermissionType::Menu, Some("/students"), Some(1)),
            node(3, "STUDENTS_2", PermissionType::Page, Some("/students"), Some(1)),
            node(4, "EMPTY", PermissionType::Category, None, None),
            no_component,
            node(6, "STUDENTS", PermissionType::Button, None, Some(2)),
            node(7, "LOST", PermissionType::Menu, Some("/lost"), Some(99)),
            disabled,
            node(9, "API_X", PermissionType::Api, Some("/students"), None),
        ])
    }

    #[test]
    fn detects_each_finding_kind() {
        let r = sample().check("db");
        assert_eq!(r.total, 9);
        assert_eq!(r.duplicate_paths.len(), 1);
        assert_eq!(r.duplicate_paths[0].key, "/students");
        let ids: Vec<i32> = r.duplicate_paths[0].nodes.iter().map(|x| x.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(r.duplicate_codes.len(), 1);
        assert_eq!(r.duplicate_codes[0].key, "STUDENTS");
        assert_eq!(r.orphans.iter().map(|x| x.id).collect::<Vec<_>>(), vec![7]);
        assert_eq!(r.empty_categories.iter().map(|x| x.id).collect::<Vec<_>>(), vec![4]);
        assert_eq!(r.missing_component.iter().map(|x| x.id).collect::<Vec<_>>(), vec![5]);
        assert_eq!(r.findings(), 5);
        assert!(r.console().contains("Duplicate paths:"));
        assert!(r.markdown().contains("## Orphaned parent"));
    }

    #[test]
    fn links_are_distinct_and_navigable() {
        let mut tree = sample();
        tree.nodes.push(node(10, "DETAIL", PermissionType::Page, Some("/students/:id"), Some(1)));
        let paths: Vec<String> = tree.links().into_iter().map(|x| x.path).collect();
        assert_eq!(paths, vec!["/students", "/enroll", "/lost"]);
    }

    #[test]
    fn api_payload_flat_and_nested() {
        let data = json!({
            "permissions": [
                {"id": 1, "code": "CENTER", "name": "Center", "type": "category", "parent_id": null},
                {"id": 2, "code": "DASH", "name": "Dash", "chinese_name": "仪表盘", "type": "menu",
                 "path": "/dashboard", "component": "views/dashboard.vue", "parent_id": 1, "status": 1}
            ]
        });
        let tree = MenuTree::from_api(&data).unwrap();
        assert_eq!(tree.nodes().len(), 2);
        assert_eq!(tree.nodes()[1].display_name(), "仪表盘");
        assert_eq!(tree.check("api").findings(), 0);

        let data = json!([
            {"id": 1, "code": "CENTER", "name": "Center", "sort": 1, "children": [
                {"id": 3, "code": "KIDS", "name": "Kids", "type": "menu", "path": "/kids", "component": "k.vue", "sort": 2}
            ]}
        ]);
        let tree = MenuTree::from_api(&data).unwrap();
        assert_eq!(tree.nodes()[1].parent_id, Some(1));
        assert_eq!(tree.nodes()[1].status, STATUS_ENABLED);

        assert!(MenuTree::from_api(&json!({"total": 0})).is_err());
    }

    #[test]
    fn dynamic_routes_resolve_relative_paths() {
        let data = json!({
            "permissions": [
                {"id": 1, "name": "Dashboard", "code": "DASHBOARD_VIEW", "type": "menu",
                 "parent_id": null, "path": "/dashboard", "component": "pages/dashboard/index.vue",
                 "file_path": "pages/dashboard/index.vue", "permission": "DASHBOARD_VIEW",
                 "icon": "Dashboard", "sort": 1, "status": 1}
            ],
            "routes": [
                {"id": 1, "name": "Dashboard", "code": "DASHBOARD_VIEW", "path": "dashboard",
                 "icon": "Dashboard", "sort": 1, "children": [
                    {"id": 2, "name": "Dashboard", "code": "DASHBOARD_VIEW", "path": "dashboard",
                     "component": "pages/dashboard/index.vue", "file_path": "pages/dashboard/index.vue",
                     "permission": "DASHBOARD_VIEW", "icon": "Dashboard", "sort": 1, "type": "menu"}
                ]}
            ]
        });
        let tree = MenuTree::from_api(&data).unwrap();
        assert_eq!(tree.nodes().len(), 2);
        assert_eq!(tree.nodes()[0].path.as_deref(), Some("/dashboard"));
        assert_eq!(tree.nodes()[1].parent_id, Some(1));
        assert_eq!(tree.nodes()[1].path.as_deref(), Some("/dashboard/dashboard"));
        let paths: Vec<String> = tree.links().into_iter().map(|x| x.path).collect();
        assert_eq!(paths, vec!["/dashboard", "/dashboard/dashboard"]);

        // absolute child paths are kept
        let data = json!({"routes": [
            {"id": 1, "code": "CENTER", "path": "/center", "children": [
                {"id": 2, "code": "KIDS", "path": "/kids", "component": "k.vue"},
                {"id": 3, "code": "ROOMS", "path": "rooms/", "component": "r.vue"}
            ]}
        ]});
        let tree = MenuTree::from_api(&data).unwrap();
        let paths: Vec<&str> = tree.nodes().iter().filter_map(|x| x.path.as_deref()).collect();
        assert_eq!(paths, vec!["/center", "/kids", "/center/rooms"]);
    }
}
