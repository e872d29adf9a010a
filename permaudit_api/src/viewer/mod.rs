pub mod permissions;
pub mod role_permissions;
pub mod roles;

pub use permissions::PermissionViewer;
pub use role_permissions::RolePermissionViewer;
pub use roles::RoleViewer;
