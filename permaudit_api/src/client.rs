use std::time::Duration;

use reqwest::{header, Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{config::ConfigApi, utils::truncate, AuditError, Result};

pub const LOGIN_PATH: &str = "/api/auth/login";
pub const PERMISSIONS_PATH: &str = "/api/permissions";
pub const DYNAMIC_ROUTES_PATH: &str = "/api/dynamic-permissions/dynamic-routes";

/// Response envelope of the backend.
#[derive(Deserialize, Debug)]
struct Envelope {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

const fn default_success() -> bool {
    true
}

pub(crate) fn create_client(timeout: u64) -> Result<Client> {
    let mut builder = Client::builder().user_agent(concat!("permaudit/", env!("CARGO_PKG_VERSION")));
    if timeout != 0 {
        builder = builder.timeout(Duration::from_secs(timeout));
    }
    builder.build().map_err(Into::into)
}

/// Backend API client with bearer token auth.
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// # Errors
    ///
    /// Will return `Err` when the http client cannot be built.
    pub fn new(cfg: &ConfigApi) -> Result<Self> {
        Ok(Self {
            client: create_client(cfg.timeout)?,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            token: None,
        })
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(x) => req.bearer_auth(x),
            None => req,
        }
    }

    async fn send(&self, url: &str, req: RequestBuilder) -> Result<Value> {
        let rsp = req.header(header::ACCEPT, "application/json").send().await?;
        let status = rsp.status();
        let body = rsp.text().await?;
        if !status.is_success() {
            return Err(AuditError::api(
                url,
                format!("status {status}, body {}", truncate(&body, 200)),
            ));
        }
        let env: Envelope = serde_json::from_str(&body)
            .map_err(|e| AuditError::api(url, format!("invalid json: {e}")))?;
        if !env.success {
            return Err(AuditError::api(
                url,
                env.message.unwrap_or_else(|| "request failed".to_owned()),
            ));
        }
        Ok(env.data)
    }

    /// Log in and keep the bearer token for later calls.
    ///
    /// # Errors
    ///
    /// Will return `Err` for http error or when no `data.token` is returned.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<&str> {
        let url = self.url(LOGIN_PATH);
        let data = self
            .send(
                &url,
                self.client
                    .post(&url)
                    .json(&json!({ "username": username, "password": password })),
            )
            .await?;
        let token = data
            .get("token")
            .and_then(Value::as_str)
            .filter(|x| !x.is_empty())
            .ok_or_else(|| AuditError::api(&url, "no `data.token` in login response"))?;
        debug!(username, token = %truncate(token, 8), "Logged in");
        Ok(self.token.insert(token.to_owned()).as_str())
    }

    /// Authenticated `GET`, returning `data` of the envelope.
    ///
    /// # Errors
    ///
    /// Will return `Err` for http or payload error.
    pub async fn get(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        self.send(&url, self.auth(self.client.get(&url))).await
    }

    /// All permissions visible to the logged-in user.
    ///
    /// # Errors
    ///
    /// Will return `Err` for http or payload error.
    pub async fn permissions(&self) -> Result<Value> {
        self.get(PERMISSIONS_PATH).await
    }

    /// Menu routes of the logged-in user.
    ///
    /// # Errors
    ///
    /// Will return `Err` for http or payload error.
    pub async fn dynamic_routes(&self) -> Result<Value> {
        self.get(DYNAMIC_ROUTES_PATH).await
    }
}
