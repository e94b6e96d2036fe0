//! Shared types for Gatekeeper

pub mod error;

pub use error::{GatekeeperError, Result};

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
