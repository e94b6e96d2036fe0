//! Development registration endpoint
//!
//! `GET /dev/register?userId=...` drives the registration flow without the
//! chat gateway. Only routed when DEV_MODE is on; membership is not checked.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::json;

use super::{json_response, query_param};
use crate::registration::RegistrationOutcome;
use crate::server::AppState;

pub async fn dev_register(state: &AppState, query: Option<&str>) -> Response<Full<Bytes>> {
    let Some(user_id) = query_param(query, "userId") else {
        return json_response(
            StatusCode::BAD_REQUEST,
            &json!({
                "ok": false,
                "message": "Parameter userId wajib. Contoh: /dev/register?userId=123456",
            }),
        );
    };

    let outcome = state.orchestrator.register(&user_id).await;
    match &outcome {
        RegistrationOutcome::AlreadyRegistered { username } => json_response(
            StatusCode::CONFLICT,
            &json!({
                "ok": false,
                "message": "Sudah terdaftar, tidak bisa daftar lagi",
                "username": username,
            }),
        ),
        RegistrationOutcome::RateLimited { retry_after, .. } => json_response(
            StatusCode::TOO_MANY_REQUESTS,
            &json!({
                "ok": false,
                "message": outcome.status_message(),
                "retryAfterMs": retry_after.as_millis() as u64,
            }),
        ),
        RegistrationOutcome::Success { username, password } => json_response(
            StatusCode::OK,
            &json!({ "ok": true, "username": username, "password": password }),
        ),
        RegistrationOutcome::Failed { .. } => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &json!({ "ok": false, "message": "Pendaftaran gagal, coba lagi nanti" }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::tests::body_string;
    use crate::server::http::tests::test_state;

    async fn call(state: &AppState, query: Option<&str>) -> (StatusCode, serde_json::Value) {
        let response = dev_register(state, query).await;
        let status = response.status();
        let body = serde_json::from_str(&body_string(response).await).unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn test_missing_user_id() {
        let state = test_state(&["--dev-mode"]);
        let (status, body) = call(&state, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_register_then_conflict_then_limit() {
        let state = test_state(&["--dev-mode", "--global-points", "2"]);

        let (status, body) = call(&state, Some("userId=42")).await;
        assert_eq!(status, StatusCode::OK);
        let username = body["username"].as_str().unwrap().to_string();
        assert!(username.starts_with("Promo"));
        assert_eq!(body["password"].as_str().unwrap().len(), 8);

        // Already registered users never spend budget
        let (status, body) = call(&state, Some("userId=42")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["username"], username);

        let (status, _) = call(&state, Some("userId=7")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&state, Some("userId=8")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(body["retryAfterMs"].as_u64().is_some());
    }
}
