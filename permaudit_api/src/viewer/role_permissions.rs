use std::collections::HashSet;

use sea_orm::{
    ActiveModelBehavior, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::{entity::role_permissions, Result};

pub struct RolePermissionViewer;

impl RolePermissionViewer {
    /// Find all links of role `role_id`.
    pub async fn find_by_role<C>(db: &C, role_id: i32) -> Result<Vec<role_permissions::Model>>
    where
        C: ConnectionTrait,
    {
        role_permissions::Entity::find()
            .filter(role_permissions::Column::RoleId.eq(role_id))
            .order_by_asc(role_permissions::Column::PermissionId)
            .all(db)
            .await
            .map_err(Into::into)
    }

    /// Grant `permission_ids` to role `role_id`.
    ///
    /// Already linked permissions are skipped. Return the number of new links.
    pub async fn grant<C>(
        db: &C,
        role_id: i32,
        permission_ids: &[i32],
        grantor: Option<i32>,
    ) -> Result<u64>
    where
        C: ConnectionTrait,
    {
        let existing: HashSet<i32> = Self::find_by_role(db, role_id)
            .await?
            .into_iter()
            .map(|x| x.permission_id)
            .collect();
        let mut seen = HashSet::new();
        let mut ins = Vec::new();
        for i in permission_ids {
            if existing.contains(i) || !seen.insert(*i) {
                continue;
            }
            ins.push(
                role_permissions::ActiveModel {
                    role_id: Set(role_id),
                    permission_id: Set(*i),
                    grantor_id: Set(grantor),
                    ..Default::default()
                }
                .before_save(db, true) // not invoked for batch insert
                .await?,
            );
        }
        if ins.is_empty() {
            return Ok(0);
        }
        let cnt = ins.len() as u64;
        role_permissions::Entity::insert_many(ins).exec(db).await?;
        Ok(cnt)
    }

    /// Revoke `permission_ids` from role `role_id`. Return the number of removed links.
    pub async fn revoke<C>(db: &C, role_id: i32, permission_ids: &[i32]) -> Result<u64>
    where
        C: ConnectionTrait,
    {
        if permission_ids.is_empty() {
            return Ok(0);
        }
        let res = role_permissions::Entity::delete_many()
            .filter(role_permissions::Column::RoleId.eq(role_id))
            .filter(role_permissions::Column::PermissionId.is_in(permission_ids.iter().copied()))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }
}
