pub mod client;
pub mod config;
pub mod crawl;
pub mod db;
pub mod entity;
pub mod error;
pub mod menu;
pub mod permission;
pub mod repair;
pub mod report;
pub mod routes;
pub mod utils;
pub mod viewer;

pub use error::{AuditError, Result};
pub use sea_orm;
