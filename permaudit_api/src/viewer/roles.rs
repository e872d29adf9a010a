use permaudit_macro::default_viewer;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use tracing::warn;

use crate::{
    entity::roles,
    permission::RoleRef,
    AuditError, Result,
};

pub struct RoleViewer;

#[default_viewer(roles)]
impl RoleViewer {
    /// Find all live roles ordered by id.
    pub async fn find_all<C>(db: &C) -> Result<Vec<roles::Model>>
    where
        C: ConnectionTrait,
    {
        roles::Entity::find()
            .filter(roles::Column::DeletedAt.is_null())
            .order_by_asc(roles::Column::Id)
            .all(db)
            .await
            .map_err(Into::into)
    }

    /// Resolve a command line role reference.
    ///
    /// Numeric ids are environment specific, a warning is logged when used.
    pub async fn resolve<C>(db: &C, role: &RoleRef) -> Result<roles::Model>
    where
        C: ConnectionTrait,
    {
        let ret = match role {
            RoleRef::Id(id) => {
                warn!(id, "Role referenced by numeric id, prefer role code");
                Self::find_by_id(db, *id)
                    .await?
                    .filter(|x| x.deleted_at.is_none())
            }
            RoleRef::Code(code) => Self::find_by_code(db, code).await?,
        };
        ret.ok_or_else(|| AuditError::RoleNotFound(role.to_string()))
    }
}
