use thiserror::Error;

pub type Result<T, E = AuditError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Role `{0}` not found")]
    RoleNotFound(String),

    #[error("Config invalid: {0}")]
    Config(String),

    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response from `{url}`: {reason}")]
    Api { url: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),

    #[error("Repair left {0} permission(s) unresolved, transaction rolled back")]
    RepairVerification(usize),
}

impl From<config::ConfigError> for AuditError {
    fn from(value: config::ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<validator::ValidationErrors> for AuditError {
    fn from(value: validator::ValidationErrors) -> Self {
        Self::Config(value.to_string())
    }
}

impl AuditError {
    pub fn api<U: Into<String>, R: Into<String>>(url: U, reason: R) -> Self {
        Self::Api {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
