use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};

use crate::{
    entity::{permissions, role_permissions},
    permission::{PermissionFilter, PermissionSet},
    Result,
};

pub struct PermissionViewer;

fn filter_cond(filter: &PermissionFilter) -> Condition {
    Condition::all()
        .add(permissions::Column::DeletedAt.is_null())
        .add_option(
            (!filter.include_disabled)
                .then(|| permissions::Column::Status.eq(permissions::STATUS_ENABLED)),
        )
        .add_option(filter.kind.map(|x| permissions::Column::Kind.eq(x)))
}

impl PermissionViewer {
    /// Find all permissions matching `filter`, in menu order.
    pub async fn find_all<C>(db: &C, filter: &PermissionFilter) -> Result<Vec<permissions::Model>>
    where
        C: ConnectionTrait,
    {
        permissions::Entity::find()
            .filter(filter_cond(filter))
            .order_by_asc(permissions::Column::Sort)
            .order_by_asc(permissions::Column::Id)
            .all(db)
            .await
            .map_err(Into::into)
    }

    /// Find permissions granted to role `role_id` matching `filter`.
    pub async fn find_by_role<C>(
        db: &C,
        role_id: i32,
        filter: &PermissionFilter,
    ) -> Result<Vec<permissions::Model>>
    where
        C: ConnectionTrait,
    {
        permissions::Entity::find()
            .inner_join(role_permissions::Entity)
            .filter(role_permissions::Column::RoleId.eq(role_id))
            .filter(filter_cond(filter))
            .distinct()
            .order_by_asc(permissions::Column::Sort)
            .order_by_asc(permissions::Column::Id)
            .all(db)
            .await
            .map_err(Into::into)
    }

    /// Code set of role `role_id`.
    pub async fn role_set<C>(db: &C, role_id: i32, filter: &PermissionFilter) -> Result<PermissionSet>
    where
        C: ConnectionTrait,
    {
        Ok(PermissionSet::from_models(
            &Self::find_by_role(db, role_id, filter).await?,
        ))
    }

    /// Find live permissions whose code is in `codes`.
    pub async fn find_by_codes<C>(db: &C, codes: &PermissionSet) -> Result<Vec<permissions::Model>>
    where
        C: ConnectionTrait,
    {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        permissions::Entity::find()
            .filter(permissions::Column::Code.is_in(codes.iter()))
            .filter(permissions::Column::DeletedAt.is_null())
            .order_by_asc(permissions::Column::Id)
            .all(db)
            .await
            .map_err(Into::into)
    }
}
