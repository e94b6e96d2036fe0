//! Downstream account API client
//!
//! Registration and login against the account service. Non-2xx answers are
//! returned as [`ApiOutcome::Rejected`] so callers can classify them; only
//! transport failures (connect, timeout, undecodable body) are errors.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::debug;

use crate::types::Result;

/// Credentials sent to the account service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Chat user id, used by the service for device correlation
    pub device_id: String,
}

/// Answer from the account service
#[derive(Debug, Clone, PartialEq)]
pub enum ApiOutcome {
    /// 2xx with the opaque response body
    Accepted(JsonValue),
    /// Anything else, with the service's message when it sent one
    Rejected { status: u16, message: String },
}

/// Account service operations (allows mocking in tests)
#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn register(&self, credentials: &Credentials) -> Result<ApiOutcome>;

    async fn login(&self, credentials: &Credentials) -> Result<ApiOutcome>;
}

#[derive(Serialize)]
struct RegisterPayload<'a> {
    username: &'a str,
    password: &'a str,
    repassword: &'a str,
    device_id: &'a str,
    channel: &'a str,
}

#[derive(Serialize)]
struct LoginPayload<'a> {
    username: &'a str,
    password: &'a str,
    device_id: &'a str,
}

/// Account API configuration
#[derive(Debug, Clone)]
pub struct AccountApiConfig {
    pub register_url: String,
    pub login_url: String,
    pub channel: String,
    pub timeout: Duration,
}

impl Default for AccountApiConfig {
    fn default() -> Self {
        Self {
            register_url: "https://api.dealerfoxy.com/user/register".to_string(),
            login_url: "https://api.dealerfoxy.com/user/login?lang=id".to_string(),
            channel: "telegram".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// reqwest-backed account API client
pub struct HttpAccountApi {
    config: AccountApiConfig,
    http_client: reqwest::Client,
}

impl HttpAccountApi {
    pub fn new(config: AccountApiConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http_client })
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, payload: &T) -> Result<ApiOutcome> {
        let response = self.http_client.post(url).json(payload).send().await?;
        let status = response.status();
        let body: JsonValue = response.json().await.unwrap_or(JsonValue::Null);
        debug!("Account API {} answered {}", url, status);

        if status.is_success() {
            return Ok(ApiOutcome::Accepted(body));
        }

        Ok(ApiOutcome::Rejected {
            status: status.as_u16(),
            message: error_message(&body).unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
        })
    }
}

#[async_trait]
impl AccountApi for HttpAccountApi {
    async fn register(&self, credentials: &Credentials) -> Result<ApiOutcome> {
        let payload = RegisterPayload {
            username: &credentials.username,
            password: &credentials.password,
            repassword: &credentials.password,
            device_id: &credentials.device_id,
            channel: &self.config.channel,
        };
        self.post(&self.config.register_url, &payload).await
    }

    async fn login(&self, credentials: &Credentials) -> Result<ApiOutcome> {
        let payload = LoginPayload {
            username: &credentials.username,
            password: &credentials.password,
            device_id: &credentials.device_id,
        };
        self.post(&self.config.login_url, &payload).await
    }
}

/// `message`, else `error`, when either is a non-empty string
fn error_message(body: &JsonValue) -> Option<String> {
    ["message", "error"]
        .iter()
        .filter_map(|field| body.get(field).and_then(JsonValue::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Bearer token from a login response body
///
/// Accepts `token`, `access_token` or `accessToken` at the top level, or
/// `token` / `access_token` nested under `data`.
pub fn extract_token(body: &JsonValue) -> Option<String> {
    let non_empty = |v: Option<&JsonValue>| {
        v.and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    ["token", "access_token", "accessToken"]
        .iter()
        .find_map(|field| non_empty(body.get(field)))
        .or_else(|| {
            let data = body.get("data")?;
            ["token", "access_token"]
                .iter()
                .find_map(|field| non_empty(data.get(field)))
        })
}
