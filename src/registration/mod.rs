//! Account registration
//!
//! - **identity**: randomized username/password candidates
//! - **store**: persisted credentials, one record per user
//! - **orchestrator**: dedup, rate limits, concurrency bound and retries

pub mod identity;
pub mod orchestrator;
pub mod store;

pub use identity::{IdentityGenerator, RandomIdentityGenerator};
pub use orchestrator::{
    is_conflict, LimitScope, OrchestratorConfig, OrchestratorDeps, RegistrationOrchestrator,
    RegistrationOutcome,
};
pub use store::{CredentialStore, RegistrationRecord, RegistrationStore};
