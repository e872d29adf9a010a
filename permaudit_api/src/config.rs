use std::path::Path;

use config::{builder::DefaultState, ConfigBuilder, Environment, File, FileFormat, Map, Value};
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use validator::{Validate, ValidationError};

use crate::{report::ReportFormat, Result};

/// Environment prefix, e.g. `PERMAUDIT__DATABASE__DSN`.
pub const ENV_PREFIX: &str = "PERMAUDIT";

/// Sections that may be omitted from the config file entirely.
const OPTIONAL_SECTIONS: [&str; 5] = ["api", "frontend", "crawl", "report", "roles"];

fn check_url(url: &str) -> Result<(), ValidationError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ValidationError::new("url must start with http:// or https://"))
    }
}

#[serde_inline_default]
#[derive(Serialize, Deserialize, Debug, Validate, Clone)]
pub struct ConfigDatabase {
    #[validate(length(min = 1))]
    pub dsn: String,
    #[serde(default)]
    pub sql_log: bool,
}

#[serde_inline_default]
#[derive(Serialize, Deserialize, Debug, Validate, Clone)]
pub struct ConfigApi {
    #[serde_inline_default("http://localhost:3000".into())]
    #[validate(custom(function = "check_url"))]
    pub base_url: String,
    #[serde_inline_default("admin".into())]
    #[validate(length(min = 1))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: Option<String>,
    /// Request timeout in seconds.
    #[serde_inline_default(10)]
    #[validate(range(min = 1))]
    pub timeout: u64,
}

#[serde_inline_default]
#[derive(Serialize, Deserialize, Debug, Validate, Clone)]
pub struct ConfigFrontend {
    #[serde_inline_default("http://localhost:5173".into())]
    #[validate(custom(function = "check_url"))]
    pub base_url: String,
}

#[serde_inline_default]
#[derive(Serialize, Deserialize, Debug, Validate, Clone)]
pub struct ConfigCrawl {
    #[serde_inline_default(2)]
    #[validate(range(max = 10))]
    pub retries: u32,
    /// Initial backoff in milliseconds.
    #[serde_inline_default(500)]
    #[validate(range(min = 1))]
    pub backoff: u64,
    /// Backoff cap in milliseconds.
    #[serde_inline_default(8000)]
    #[validate(range(min = 1))]
    pub backoff_max: u64,
    /// Per-page timeout in seconds.
    #[serde_inline_default(10)]
    #[validate(range(min = 1))]
    pub timeout: u64,
    /// Delay between pages in milliseconds.
    #[serde_inline_default(50)]
    pub delay: u64,
}

#[serde_inline_default]
#[derive(Serialize, Deserialize, Debug, Validate, Clone)]
pub struct ConfigReport {
    #[serde_inline_default("reports".into())]
    #[validate(length(min = 1))]
    pub dir: String,
    #[serde(default)]
    pub format: ReportFormat,
}

#[serde_inline_default]
#[derive(Serialize, Deserialize, Debug, Validate, Clone)]
pub struct ConfigRoles {
    #[serde_inline_default("admin".into())]
    #[validate(length(min = 1))]
    pub reference: String,
    #[serde_inline_default("principal".into())]
    #[validate(length(min = 1))]
    pub target: String,
}

#[derive(Serialize, Deserialize, Debug, Validate, Clone)]
pub struct Config {
    #[validate(nested)]
    pub database: ConfigDatabase,
    #[validate(nested)]
    pub api: ConfigApi,
    #[validate(nested)]
    pub frontend: ConfigFrontend,
    #[validate(nested)]
    pub crawl: ConfigCrawl,
    #[validate(nested)]
    pub report: ConfigReport,
    #[validate(nested)]
    pub roles: ConfigRoles,
}

impl Config {
    fn finish(mut builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        for section in OPTIONAL_SECTIONS {
            builder = builder.set_default(section, Map::<String, Value>::new())?;
        }
        let cfg = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let ret: Self = cfg.try_deserialize()?;
        ret.validate()?;
        // additional checker
        if ret.crawl.backoff > ret.crawl.backoff_max {
            return Err(crate::AuditError::Config(
                "`crawl.backoff` must not exceed `crawl.backoff_max`".to_owned(),
            ));
        }
        Ok(ret)
    }

    /// Parse config from `content` in `format`, environment overrides included.
    ///
    /// # Errors
    ///
    /// Will return `Err` when the content is malformed or invalid.
    pub fn parse(content: &str, format: FileFormat) -> Result<Self> {
        Self::finish(config::Config::builder().add_source(File::from_str(content, format)))
    }
}

/// Load config file from `path`, format guessed by extension.
///
/// # Errors
///
/// Will return `Err` when the file is missing, malformed or invalid.
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    Config::finish(config::Config::builder().add_source(File::from(path.as_ref())))
}
