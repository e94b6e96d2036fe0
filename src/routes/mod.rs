//! HTTP routes for Gatekeeper

pub mod dev;
pub mod health;
pub mod landing;

pub use dev::dev_register;
pub use health::{health_check, version_info};
pub use landing::{signed_landing, LandingKind};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::types::GatekeeperError;

/// JSON response with the given status
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(body)
        .unwrap_or_else(|_| r#"{"ok":false,"message":"Serialization failed"}"#.to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Plain-text response with the given status
pub fn text_response(status: StatusCode, body: impl Into<String>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body.into())))
        .unwrap()
}

/// Plain-text error carrying the error's own status and message
pub fn error_response(err: &GatekeeperError) -> Response<Full<Bytes>> {
    let message = match err {
        GatekeeperError::BadRequest(m) | GatekeeperError::Forbidden(m) | GatekeeperError::NotFound(m) => {
            m.clone()
        }
        other => other.to_string(),
    };
    text_response(err.status_code(), message)
}

/// 302 to `location`
pub fn redirect_response(location: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header("Location", location)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Value of `key` in a raw query string, if present and non-empty
pub fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query.unwrap_or_default()).ok()?;
    pairs
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
