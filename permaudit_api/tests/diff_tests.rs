mod common;

use permaudit_api::{
    AuditError,
    entity::permissions::PermissionType,
    permission::{PermissionFilter, PermissionIndex, PermissionSet, RoleDiff, RoleRef},
    report::{DiffReport, Report},
    viewer::{PermissionViewer, RoleViewer},
};

#[tokio::test]
async fn seeded_roles_diff() {
    let db = common::setup().await;
    let seed = common::seed(&db, false).await;
    let filter = PermissionFilter::default();

    let admin = PermissionViewer::role_set(&db, seed.admin.id, &filter).await.unwrap();
    let principal = PermissionViewer::role_set(&db, seed.principal.id, &filter)
        .await
        .unwrap();
    let diff = RoleDiff::compute("admin", &admin, "principal", &principal);
    assert_eq!(diff.missing, PermissionSet::from_codes(["B", "C"]));
    assert!(diff.extra.is_empty());
    assert_eq!(diff.common, PermissionSet::from_codes(["A"]));

    let index = PermissionIndex::new(PermissionViewer::find_all(&db, &filter).await.unwrap());
    let report = DiffReport::build(&seed.admin, &seed.principal, &diff, &index);
    assert_eq!(report.findings(), 2);
    assert_eq!(
        report.missing_by_type,
        vec![(PermissionType::Menu, 1), (PermissionType::Api, 1)]
    );
}

#[tokio::test]
async fn self_diff_is_empty() {
    let db = common::setup().await;
    let seed = common::seed(&db, true).await;
    let filter = PermissionFilter::default();
    let set = PermissionViewer::role_set(&db, seed.principal.id, &filter)
        .await
        .unwrap();
    assert!(RoleDiff::compute("principal", &set, "principal", &set).is_identical());
}

#[tokio::test]
async fn disabled_permissions_filtered() {
    use permaudit_api::{
        entity::permissions,
        sea_orm::{ActiveModelTrait, IntoActiveModel, Set},
    };

    let db = common::setup().await;
    let seed = common::seed(&db, false).await;
    let mut c = seed.perms[2].clone().into_active_model();
    c.status = Set(permissions::STATUS_DISABLED);
    c.update(&db).await.unwrap();

    let live = PermissionViewer::role_set(&db, seed.admin.id, &PermissionFilter::default())
        .await
        .unwrap();
    assert_eq!(live, PermissionSet::from_codes(["A", "B"]));

    let all = PermissionViewer::role_set(
        &db,
        seed.admin.id,
        &PermissionFilter {
            include_disabled: true,
            kind: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(all.len(), 3);

    let menus = PermissionViewer::find_by_role(
        &db,
        seed.admin.id,
        &PermissionFilter {
            include_disabled: false,
            kind: Some(PermissionType::Menu),
        },
    )
    .await
    .unwrap();
    assert_eq!(menus.len(), 1);
    assert_eq!(menus[0].code, "B");
}

#[tokio::test]
async fn role_resolution() {
    let db = common::setup().await;
    let seed = common::seed(&db, false).await;

    let by_code = RoleViewer::resolve(&db, &"principal".parse::<RoleRef>().unwrap())
        .await
        .unwrap();
    assert_eq!(by_code.id, seed.principal.id);

    let by_id = RoleViewer::resolve(&db, &RoleRef::Id(seed.admin.id))
        .await
        .unwrap();
    assert_eq!(by_id.code, "admin");

    let err = RoleViewer::resolve(&db, &RoleRef::Code("nobody".to_owned()))
        .await
        .unwrap_err();
    assert!(matches!(err, AuditError::RoleNotFound(x) if x == "nobody"));

    assert_eq!(RoleViewer::count(&db).await.unwrap(), 2);
    assert_eq!(RoleViewer::find_all(&db).await.unwrap().len(), 2);
}

#[tokio::test]
async fn find_by_codes_skips_unknown() {
    let db = common::setup().await;
    common::seed(&db, false).await;
    let rows = PermissionViewer::find_by_codes(&db, &PermissionSet::from_codes(["B", "NOPE"]))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].code, "B");
    assert!(
        PermissionViewer::find_by_codes(&db, &PermissionSet::new())
            .await
            .unwrap()
            .is_empty()
    );
}
