//! Signed link landing endpoints
//!
//! `GET /one-tap-login` and `GET /first-party-login` accept
//! `uid`, `ts` and `sig`. A valid link for a registered user schedules the
//! tutorial push and redirects to the main site. Expired links and bad
//! signatures get the same 403 so a caller cannot tell them apart.

use bytes::Bytes;
use http_body_util::Full;
use hyper::Response;
use tracing::{debug, info};

use super::{error_response, query_param, redirect_response};
use crate::registration::CredentialStore;
use crate::server::AppState;
use crate::types::{now_millis, GatekeeperError, Result};

const INVALID_REQUEST: &str = "Permintaan tidak valid";
const INVALID_LINK: &str = "Tautan tidak valid atau kedaluwarsa";
const UNKNOWN_USER: &str = "Pengguna tidak ditemukan";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandingKind {
    OneTap,
    FirstParty,
}

impl LandingKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::OneTap => "one-tap",
            Self::FirstParty => "first-party",
        }
    }
}

pub fn signed_landing(state: &AppState, query: Option<&str>, kind: LandingKind) -> Response<Full<Bytes>> {
    match verify_landing(state, query, now_millis()) {
        Ok(user_id) => {
            info!(user_id = %user_id, kind = kind.as_str(), "Signed link opened");
            state.scheduler.schedule_push(&user_id, None);
            redirect_response(&state.args.main_site_url)
        }
        Err(e) => {
            debug!(kind = kind.as_str(), "Signed link rejected: {}", e);
            error_response(&e)
        }
    }
}

/// The verified, registered user id behind a landing request
fn verify_landing(state: &AppState, query: Option<&str>, now: i64) -> Result<String> {
    let params = (
        query_param(query, "uid"),
        query_param(query, "ts"),
        query_param(query, "sig"),
        state.links.as_ref(),
    );
    let (Some(uid), Some(ts), Some(sig), Some(links)) = params else {
        return Err(GatekeeperError::BadRequest(INVALID_REQUEST.into()));
    };

    let ts: i64 = ts
        .parse()
        .map_err(|_| GatekeeperError::Forbidden(INVALID_LINK.into()))?;
    if !links
        .signer()
        .verify(&uid, ts, &sig, now, state.args.one_tap_ttl_sec)
    {
        return Err(GatekeeperError::Forbidden(INVALID_LINK.into()));
    }

    if !state.store.is_registered(&uid) {
        return Err(GatekeeperError::NotFound(UNKNOWN_USER.into()));
    }
    Ok(uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::store::tests::record;
    use crate::routes::tests::body_string;
    use crate::server::http::tests::test_state;
    use hyper::StatusCode;

    const LINK_ARGS: &[&str] = &[
        "--public-base-url",
        "bot.example",
        "--one-tap-secret",
        "s3cret",
        "--main-site-url",
        "https://site.example/",
    ];

    async fn state_with_user() -> AppState {
        let state = test_state(LINK_ARGS);
        state.store.insert(record("42", "Promo42abc_DF")).await.unwrap();
        state
    }

    fn signed_query(state: &AppState, uid: &str, ts: i64) -> String {
        let sig = state.links.as_ref().unwrap().signer().sign(uid, ts);
        format!("uid={}&ts={}&sig={}", uid, ts, sig)
    }

    #[tokio::test]
    async fn test_valid_link_redirects_and_schedules_push() {
        let state = state_with_user().await;
        let query = signed_query(&state, "42", now_millis());

        let response = signed_landing(&state, Some(&query), LandingKind::OneTap);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get("Location").unwrap(), "https://site.example/");
        assert!(state.scheduler.is_pending("42"));
    }

    #[tokio::test]
    async fn test_missing_params_are_bad_request() {
        let state = state_with_user().await;
        let response = signed_landing(&state, Some("uid=42&ts=1"), LandingKind::FirstParty);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, INVALID_REQUEST);

        // No secret configured means no link can be valid
        let bare = test_state(&[]);
        let response = signed_landing(&bare, Some("uid=42&ts=1&sig=ab"), LandingKind::OneTap);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_expired_and_forged_look_the_same() {
        let state = state_with_user().await;
        let now = now_millis();

        let expired = signed_query(&state, "42", now - 301_000);
        let forged = format!("uid=42&ts={}&sig={}", now, "0".repeat(64));

        let expired = signed_landing(&state, Some(&expired), LandingKind::OneTap);
        let forged = signed_landing(&state, Some(&forged), LandingKind::OneTap);
        assert_eq!(expired.status(), StatusCode::FORBIDDEN);
        assert_eq!(forged.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_string(expired).await, body_string(forged).await);
        assert!(!state.scheduler.is_pending("42"));
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let state = state_with_user().await;
        let query = signed_query(&state, "7", now_millis());
        let response = signed_landing(&state, Some(&query), LandingKind::FirstParty);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, UNKNOWN_USER);
    }
}
