//! Health and version endpoints

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::json_response;
use crate::membership::MembershipCache;
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ok: bool,
    /// RFC 3339 time of the probe
    pub timestamp: String,
    pub uptime: u64,
    pub registered_users: usize,
    pub pending_pushes: usize,
    pub signed_links: bool,
    pub membership: MembershipHealth,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipHealth {
    /// False when no required groups are configured
    pub enabled: bool,
    pub cached: usize,
    pub hits: u64,
    pub live_queries: u64,
    pub query_errors: u64,
}

#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub commit_full: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

/// Liveness probe: always 200 while the process runs
pub fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let response = HealthResponse {
        ok: true,
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime: state.started_at.elapsed().as_secs(),
        registered_users: state.store.len(),
        pending_pushes: state.scheduler.pending_count(),
        signed_links: state.links.is_some(),
        membership: membership_health(&state.membership),
    };
    json_response(StatusCode::OK, &response)
}

fn membership_health(cache: &MembershipCache) -> MembershipHealth {
    let stats = cache.stats();
    MembershipHealth {
        enabled: cache.is_enabled(),
        cached: cache.len(),
        hits: stats.hits,
        live_queries: stats.live_queries,
        query_errors: stats.query_errors,
    }
}

/// Build metadata stamped by build.rs
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "gatekeeper",
    };
    json_response(StatusCode::OK, &response)
}
