//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one task per connection, routed by
//! `(method, path)`.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::delivery::DelayedPushScheduler;
use crate::membership::MembershipCache;
use crate::registration::{RegistrationOrchestrator, RegistrationStore};
use crate::routes::{self, LandingKind};
use crate::signing::LinkBuilder;
use crate::types::Result;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Persisted registrations
    pub store: Arc<RegistrationStore>,
    /// Registration flow (used by /dev/register)
    pub orchestrator: Arc<RegistrationOrchestrator>,
    /// Group membership gate (reported on /health)
    pub membership: Arc<MembershipCache>,
    /// Tutorial pushes triggered by signed links
    pub scheduler: DelayedPushScheduler,
    /// Signed link builder/verifier; `None` when links are not configured
    pub links: Option<Arc<LinkBuilder>>,
    pub started_at: Instant,
}

/// Serve until `shutdown` flips to true
pub async fn run(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!("Gatekeeper HTTP listening on {}", state.args.listen);

    if state.args.dev_mode {
        warn!("Development mode enabled - /dev/register is exposed");
    }
    if state.links.is_none() {
        info!("Signed links disabled (PUBLIC_BASE_URL or ONE_TAP_SECRET not set)");
    }

    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }

    info!("HTTP server stopped");
    Ok(())
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") => routes::health_check(&state),

        (Method::GET, "/version") => routes::version_info(),

        (Method::GET, "/dev/register") if state.args.dev_mode => {
            routes::dev_register(&state, query.as_deref()).await
        }

        (Method::GET, "/one-tap-login") => {
            routes::signed_landing(&state, query.as_deref(), LandingKind::OneTap)
        }

        (Method::GET, "/first-party-login") => {
            routes::signed_landing(&state, query.as_deref(), LandingKind::FirstParty)
        }

        _ => not_found_response(&path),
    };

    Ok(response)
}

fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    routes::json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "ok": false, "error": "Not Found", "path": path }),
    )
}
