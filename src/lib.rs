//! Gatekeeper - chat-driven account registration with paced delivery
//!
//! A messaging bot hands out accounts on a downstream service, at most one
//! per chat user, while keeping every outbound message under the gateway's
//! send limits.
//!
//! ## Components
//!
//! - **Registration**: per-user exactly-once orchestration behind global and
//!   per-user rate limits and a concurrency bound
//! - **Membership**: positive-only cache of required group membership
//! - **Delivery**: one paced FIFO funnel for every send, plus debounced
//!   per-user follow-up pushes
//! - **Signing**: HMAC capability links that open the main site and trigger a
//!   follow-up push
//! - **Bot / HTTP**: long-polling dispatcher and a small hyper server

pub mod bot;
pub mod config;
pub mod delivery;
pub mod limits;
pub mod membership;
pub mod registration;
pub mod routes;
pub mod server;
pub mod services;
pub mod signing;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{GatekeeperError, Result};
