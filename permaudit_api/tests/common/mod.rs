#![allow(dead_code)]

use migration::{Migrator, MigratorTrait};
use permaudit_api::{
    config::ConfigDatabase,
    db,
    entity::{
        permissions::{self, PermissionType},
        role_permissions, roles,
    },
    sea_orm::{ActiveModelTrait, DatabaseConnection, Set},
};

/// Fresh in-memory database with the schema applied.
pub async fn setup() -> DatabaseConnection {
    let db = db::connect(&ConfigDatabase {
        dsn: "sqlite::memory:".to_owned(),
        sql_log: false,
    })
    .await
    .unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

pub async fn role(db: &DatabaseConnection, code: &str) -> roles::Model {
    roles::ActiveModel {
        code: Set(code.to_owned()),
        name: Set(code.to_uppercase()),
        status: Set(1),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn permission(
    db: &DatabaseConnection,
    code: &str,
    kind: PermissionType,
    path: Option<&str>,
) -> permissions::Model {
    permissions::ActiveModel {
        code: Set(code.to_owned()),
        name: Set(code.to_lowercase()),
        kind: Set(kind),
        path: Set(path.map(ToOwned::to_owned)),
        sort: Set(0),
        status: Set(permissions::STATUS_ENABLED),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn link(db: &DatabaseConnection, role_id: i32, permission_id: i32) {
    role_permissions::ActiveModel {
        role_id: Set(role_id),
        permission_id: Set(permission_id),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap();
}

/// `admin:[A,B,C]`, `principal:[A]`, plus an unrelated `Z` held by principal only
/// when `extra` is set.
pub struct Seed {
    pub admin: roles::Model,
    pub principal: roles::Model,
    pub perms: Vec<permissions::Model>,
}

pub async fn seed(db: &DatabaseConnection, extra: bool) -> Seed {
    let admin = role(db, "admin").await;
    let principal = role(db, "principal").await;
    let a = permission(db, "A", PermissionType::Category, Some("/a")).await;
    let b = permission(db, "B", PermissionType::Menu, Some("/b")).await;
    let c = permission(db, "C", PermissionType::Api, None).await;
    for i in [&a, &b, &c] {
        link(db, admin.id, i.id).await;
    }
    link(db, principal.id, a.id).await;
    let mut perms = vec![a, b, c];
    if extra {
        let z = permission(db, "Z", PermissionType::Menu, Some("/z")).await;
        link(db, principal.id, z.id).await;
        perms.push(z);
    }
    Seed {
        admin,
        principal,
        perms,
    }
}
