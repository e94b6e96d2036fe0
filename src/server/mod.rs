//! HTTP server for Gatekeeper

pub mod http;

pub use http::{run, AppState};
