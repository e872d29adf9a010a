use std::fmt;

use permaudit_macro::{entity_behavior, entity_timestamp};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Permission node kind, stored as lowercase text.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum PermissionType {
    #[sea_orm(string_value = "category")]
    Category,
    #[default]
    #[sea_orm(string_value = "menu")]
    Menu,
    #[sea_orm(string_value = "page")]
    Page,
    #[sea_orm(string_value = "button")]
    Button,
    #[sea_orm(string_value = "api")]
    Api,
}

impl PermissionType {
    /// Whether the node is rendered as a sidebar/router entry.
    #[must_use]
    pub const fn is_navigable(self) -> bool {
        matches!(self, Self::Menu | Self::Page)
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Category => "category",
            Self::Menu => "menu",
            Self::Page => "page",
            Self::Button => "button",
            Self::Api => "api",
        })
    }
}

pub const STATUS_ENABLED: i32 = 1;
pub const STATUS_DISABLED: i32 = 0;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Default, Serialize, Deserialize)]
#[sea_orm(table_name = "permissions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub code: String,
    pub name: String,
    pub chinese_name: Option<String>,
    #[sea_orm(column_name = "type")]
    #[serde(rename = "type")]
    pub kind: PermissionType,
    pub path: Option<String>,
    pub component: Option<String>,
    pub parent_id: Option<i32>,
    pub icon: Option<String>,
    pub sort: i32,
    pub status: i32,
    pub created_at: DateTime,
    pub updated_at: DateTime,
    pub deleted_at: Option<DateTime>,
}

impl Model {
    /// Display name, preferring the localized one.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.chinese_name
            .as_deref()
            .filter(|x| !x.is_empty())
            .unwrap_or(&self.name)
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.status == STATUS_ENABLED
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::role_permissions::Entity")]
    RolePermission,
    #[sea_orm(belongs_to = "Entity", from = "Column::ParentId", to = "Column::Id")]
    Parent,
}

impl Related<super::role_permissions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RolePermission.def()
    }
}

impl Related<super::roles::Entity> for Entity {
    fn to() -> RelationDef {
        super::role_permissions::Relation::Role.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::role_permissions::Relation::Permission.def().rev())
    }
}

#[entity_timestamp]
impl ActiveModel {}

#[entity_behavior]
impl ActiveModelBehavior for ActiveModel {}
