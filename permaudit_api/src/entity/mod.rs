pub mod permissions;
pub mod role_permissions;
pub mod roles;
