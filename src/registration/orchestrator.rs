//! Registration orchestrator
//!
//! Produces at most one successful registration per user:
//!
//! 1. Calls for the same user are serialized on a per-user lock
//! 2. Already-registered users short-circuit before any limiter is touched
//! 3. The global limiter, then a concurrency slot, then the per-user limiter
//! 4. Up to `max_attempts` downstream calls, regenerating the username on
//!    collisions and backing off briefly after a conflict answer
//!
//! The concurrency slot is held by a guard, so it is returned on every exit.

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::identity::IdentityGenerator;
use super::store::{CredentialStore, RegistrationRecord};
use crate::limits::{ConcurrencySemaphore, Consumption, RateLimiter, GLOBAL_KEY};
use crate::services::account_api::{AccountApi, ApiOutcome, Credentials};

/// Message fragments the account service uses for a taken username
const CONFLICT_MARKERS: &[&str] = &["exist", "taken", "terpakai"];

/// Which budget rejected the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    Global,
    PerUser,
}

/// Result of a registration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    AlreadyRegistered { username: String },
    RateLimited { scope: LimitScope, retry_after: Duration },
    Success { username: String, password: String },
    Failed { reason: String },
}

impl RegistrationOutcome {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRegistered { .. } => "already_registered",
            Self::RateLimited { .. } => "rate_limited",
            Self::Success { .. } => "success",
            Self::Failed { .. } => "failed",
        }
    }

    /// Short status line shown to the user
    pub fn status_message(&self) -> &'static str {
        match self {
            Self::AlreadyRegistered { .. } => "Sudah terdaftar",
            Self::RateLimited { scope: LimitScope::Global, .. } => "Sistem sibuk, coba lagi nanti",
            Self::RateLimited { scope: LimitScope::PerUser, .. } => "Terlalu sering, coba lagi nanti.",
            Self::Success { .. } => "Berhasil",
            Self::Failed { .. } => "Pendaftaran gagal, coba lagi nanti.",
        }
    }
}

/// Retry tuning
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Downstream registration calls per request
    pub max_attempts: u32,
    /// Username regenerations per attempt when a candidate collides
    pub max_regenerations: u32,
    /// Backoff after a conflict is drawn uniformly from this range
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_regenerations: 10,
            backoff_min: Duration::from_millis(50),
            backoff_max: Duration::from_millis(150),
        }
    }
}

/// Collaborators the orchestrator composes
pub struct OrchestratorDeps {
    pub store: Arc<dyn CredentialStore>,
    pub api: Arc<dyn AccountApi>,
    pub identity: Arc<dyn IdentityGenerator>,
    pub global_limiter: Arc<RateLimiter>,
    pub user_limiter: Arc<RateLimiter>,
    pub semaphore: ConcurrencySemaphore,
}

pub struct RegistrationOrchestrator {
    store: Arc<dyn CredentialStore>,
    api: Arc<dyn AccountApi>,
    identity: Arc<dyn IdentityGenerator>,
    global_limiter: Arc<RateLimiter>,
    user_limiter: Arc<RateLimiter>,
    semaphore: ConcurrencySemaphore,
    user_locks: DashMap<String, Arc<Mutex<()>>>,
    config: OrchestratorConfig,
}

impl RegistrationOrchestrator {
    pub fn new(deps: OrchestratorDeps, config: OrchestratorConfig) -> Self {
        Self {
            store: deps.store,
            api: deps.api,
            identity: deps.identity,
            global_limiter: deps.global_limiter,
            user_limiter: deps.user_limiter,
            semaphore: deps.semaphore,
            user_locks: DashMap::new(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Register `user_id`, or report why not
    pub async fn register(&self, user_id: &str) -> RegistrationOutcome {
        let lock = Arc::clone(
            self.user_locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        let outcome = {
            let _serial = lock.lock().await;
            self.register_serialized(user_id).await
        };

        // Only the map and this call hold the lock: nobody else is waiting
        self.user_locks
            .remove_if(user_id, |_, held| Arc::strong_count(held) <= 2);

        match &outcome {
            RegistrationOutcome::Failed { reason } => {
                error!(user_id, "Registration failed: {}", reason)
            }
            other => debug!(user_id, outcome = other.code(), "Registration finished"),
        }
        outcome
    }

    async fn register_serialized(&self, user_id: &str) -> RegistrationOutcome {
        if let Some(record) = self.store.get(user_id) {
            return RegistrationOutcome::AlreadyRegistered {
                username: record.username,
            };
        }

        if let Consumption::Rejected { retry_after } = self.global_limiter.consume(GLOBAL_KEY) {
            warn!("Global registration budget exhausted");
            return RegistrationOutcome::RateLimited {
                scope: LimitScope::Global,
                retry_after,
            };
        }

        let _slot = match self.semaphore.acquire().await {
            Ok(slot) => slot,
            Err(e) => return RegistrationOutcome::Failed { reason: e.to_string() },
        };

        if let Consumption::Rejected { retry_after } = self.user_limiter.consume(user_id) {
            return RegistrationOutcome::RateLimited {
                scope: LimitScope::PerUser,
                retry_after,
            };
        }

        self.attempt_registration(user_id).await
    }

    async fn attempt_registration(&self, user_id: &str) -> RegistrationOutcome {
        let max_attempts = self.config.max_attempts;
        let mut attempted = HashSet::new();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let username = self.fresh_username(&attempted);
            attempted.insert(username.clone());

            let credentials = Credentials {
                username,
                password: self.identity.generate_password(),
                device_id: user_id.to_string(),
            };

            match self.api.register(&credentials).await {
                Ok(ApiOutcome::Accepted(_)) => return self.persist(user_id, credentials).await,
                Ok(ApiOutcome::Rejected { status, message }) if is_conflict(status, &message) => {
                    warn!(
                        user_id,
                        "Username {} rejected as taken ({}/{})",
                        credentials.username,
                        attempt,
                        max_attempts
                    );
                    last_error = Some(format!(
                        "Konflik username, mencoba lagi ({}/{}): {}",
                        attempt, max_attempts, message
                    ));
                    if attempt < max_attempts {
                        tokio::time::sleep(self.backoff()).await;
                    }
                }
                Ok(ApiOutcome::Rejected { message, .. }) => {
                    return RegistrationOutcome::Failed {
                        reason: format!("Pendaftaran gagal: {}", message),
                    };
                }
                Err(e) => return RegistrationOutcome::Failed { reason: e.to_string() },
            }
        }

        RegistrationOutcome::Failed {
            reason: last_error.unwrap_or_else(|| "Kesalahan tidak diketahui".to_string()),
        }
    }

    /// A candidate not yet tried in this call and not held by another user
    fn fresh_username(&self, attempted: &HashSet<String>) -> String {
        let mut candidate = self.identity.generate_username();
        let mut regenerations = 0;
        while regenerations < self.config.max_regenerations
            && (attempted.contains(&candidate) || self.store.is_username_taken(&candidate))
        {
            candidate = self.identity.generate_username();
            regenerations += 1;
        }
        candidate
    }

    async fn persist(&self, user_id: &str, credentials: Credentials) -> RegistrationOutcome {
        let record = RegistrationRecord {
            user_id: user_id.to_string(),
            username: credentials.username,
            password: credentials.password,
            created_at: Utc::now(),
        };
        let (username, password) = (record.username.clone(), record.password.clone());

        match self.store.insert(record).await {
            Ok(()) => {
                info!(user_id, "Registered {}", username);
                RegistrationOutcome::Success { username, password }
            }
            Err(e) => RegistrationOutcome::Failed {
                reason: format!("account {} created but not recorded: {}", username, e),
            },
        }
    }

    fn backoff(&self) -> Duration {
        let (min, max) = (self.config.backoff_min, self.config.backoff_max);
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

/// Conflict answers are retried with a new username; everything else is terminal
pub fn is_conflict(status: u16, message: &str) -> bool {
    let message = message.to_lowercase();
    status == 409 || CONFLICT_MARKERS.iter().any(|marker| message.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::RateLimiterConfig;
    use crate::registration::identity::RandomIdentityGenerator;
    use crate::registration::store::tests::record;
    use crate::registration::store::RegistrationStore;
    use crate::types::{GatekeeperError, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Account API answering from a script, recording every call
    #[derive(Default)]
    struct ScriptedApi {
        script: StdMutex<VecDeque<Result<ApiOutcome>>>,
        calls: StdMutex<Vec<Credentials>>,
        delay: Duration,
    }

    impl ScriptedApi {
        fn new(script: Vec<Result<ApiOutcome>>) -> Self {
            Self {
                script: StdMutex::new(script.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Credentials> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AccountApi for ScriptedApi {
        async fn register(&self, credentials: &Credentials) -> Result<ApiOutcome> {
            self.calls.lock().unwrap().push(credentials.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(ApiOutcome::Accepted(serde_json::json!({}))))
        }

        async fn login(&self, _credentials: &Credentials) -> Result<ApiOutcome> {
            Ok(ApiOutcome::Accepted(serde_json::json!({"token": "t"})))
        }
    }

    /// Generator replaying fixed usernames
    struct SequenceGenerator(StdMutex<VecDeque<String>>);

    impl SequenceGenerator {
        fn new(names: &[&str]) -> Self {
            Self(StdMutex::new(names.iter().map(|s| s.to_string()).collect()))
        }
    }

    impl IdentityGenerator for SequenceGenerator {
        fn generate_username(&self) -> String {
            self.0.lock().unwrap().pop_front().expect("generator exhausted")
        }

        fn generate_password(&self) -> String {
            "Pass2345".to_string()
        }
    }

    fn conflict() -> Result<ApiOutcome> {
        Ok(ApiOutcome::Rejected {
            status: 409,
            message: "Username already exists".into(),
        })
    }

    struct Harness {
        orchestrator: Arc<RegistrationOrchestrator>,
        store: Arc<RegistrationStore>,
        api: Arc<ScriptedApi>,
    }

    fn harness_with(
        api: ScriptedApi,
        identity: Arc<dyn IdentityGenerator>,
        store: RegistrationStore,
        user_points: u32,
        global_points: u32,
    ) -> Harness {
        let store = Arc::new(store);
        let api = Arc::new(api);
        let orchestrator = RegistrationOrchestrator::new(
            OrchestratorDeps {
                store: store.clone(),
                api: api.clone(),
                identity,
                global_limiter: Arc::new(RateLimiter::new(RateLimiterConfig::new(global_points, 60))),
                user_limiter: Arc::new(RateLimiter::new(RateLimiterConfig::new(user_points, 60))),
                semaphore: ConcurrencySemaphore::new(2),
            },
            OrchestratorConfig::default(),
        );
        Harness {
            orchestrator: Arc::new(orchestrator),
            store,
            api,
        }
    }

    fn harness(api: ScriptedApi) -> Harness {
        harness_with(
            api,
            Arc::new(RandomIdentityGenerator),
            RegistrationStore::memory_only(),
            3,
            300,
        )
    }

    #[test]
    fn test_conflict_classification() {
        assert!(is_conflict(409, ""));
        assert!(is_conflict(400, "Username sudah TERPAKAI"));
        assert!(is_conflict(400, "user already exists"));
        assert!(is_conflict(422, "Name Taken"));
        assert!(!is_conflict(400, "invalid password"));
        assert!(!is_conflict(500, "HTTP 500"));
    }

    #[tokio::test]
    async fn test_success_then_already_registered() {
        let h = harness(ScriptedApi::default());

        let first = h.orchestrator.register("42").await;
        let username = match &first {
            RegistrationOutcome::Success { username, password } => {
                assert_eq!(password.len(), 8);
                username.clone()
            }
            other => panic!("expected success, got {:?}", other),
        };

        for _ in 0..2 {
            assert_eq!(
                h.orchestrator.register("42").await,
                RegistrationOutcome::AlreadyRegistered { username: username.clone() }
            );
        }
        assert_eq!(h.api.calls().len(), 1);
        assert_eq!(h.store.get("42").unwrap().username, username);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_limiters() {
        let h = harness_with(
            ScriptedApi::default(),
            Arc::new(RandomIdentityGenerator),
            RegistrationStore::memory_only(),
            1,
            1,
        );
        h.store.insert(record("42", "Promo12xYz_DF")).await.unwrap();

        for _ in 0..5 {
            assert!(matches!(
                h.orchestrator.register("42").await,
                RegistrationOutcome::AlreadyRegistered { .. }
            ));
        }
        // Budgets untouched: a new user still gets through
        assert!(matches!(
            h.orchestrator.register("7").await,
            RegistrationOutcome::Success { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicts_then_success_backs_off() {
        let h = harness(ScriptedApi::new(vec![conflict(), conflict()]));

        let started = tokio::time::Instant::now();
        let outcome = h.orchestrator.register("42").await;
        let elapsed = started.elapsed();

        assert!(matches!(outcome, RegistrationOutcome::Success { .. }));
        let calls = h.api.calls();
        assert_eq!(calls.len(), 3);
        let distinct: HashSet<_> = calls.iter().map(|c| c.username.clone()).collect();
        assert_eq!(distinct.len(), 3);
        assert!(calls.iter().all(|c| c.device_id == "42"));

        assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(300), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn test_colliding_candidate_is_never_sent() {
        let store = RegistrationStore::memory_only();
        store.insert(record("1", "Promo00aaa_DF")).await.unwrap();

        let h = harness_with(
            ScriptedApi::default(),
            Arc::new(SequenceGenerator::new(&["Promo00aaa_DF", "Promo11bbb_DF"])),
            store,
            3,
            300,
        );

        assert_eq!(
            h.orchestrator.register("2").await,
            RegistrationOutcome::Success {
                username: "Promo11bbb_DF".into(),
                password: "Pass2345".into(),
            }
        );
        let calls = h.api.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].username, "Promo11bbb_DF");
    }

    #[tokio::test]
    async fn test_terminal_rejection_stops_immediately() {
        let h = harness(ScriptedApi::new(vec![Ok(ApiOutcome::Rejected {
            status: 400,
            message: "invalid channel".into(),
        })]));

        match h.orchestrator.register("42").await {
            RegistrationOutcome::Failed { reason } => assert!(reason.contains("invalid channel")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(h.api.calls().len(), 1);
        assert!(!h.store.is_registered("42"));
    }

    #[tokio::test]
    async fn test_transport_error_stops_immediately() {
        let h = harness(ScriptedApi::new(vec![Err(GatekeeperError::Http(
            "connection refused".into(),
        ))]));

        assert!(matches!(
            h.orchestrator.register("42").await,
            RegistrationOutcome::Failed { .. }
        ));
        assert_eq!(h.api.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_report_last_conflict() {
        let h = harness(ScriptedApi::new((0..5).map(|_| conflict()).collect()));

        match h.orchestrator.register("42").await {
            RegistrationOutcome::Failed { reason } => assert!(reason.contains("5/5"), "{}", reason),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(h.api.calls().len(), 5);
    }

    #[tokio::test]
    async fn test_per_user_limit() {
        let h = harness_with(
            ScriptedApi::new(vec![
                Ok(ApiOutcome::Rejected { status: 400, message: "nope".into() }),
                Ok(ApiOutcome::Rejected { status: 400, message: "nope".into() }),
            ]),
            Arc::new(RandomIdentityGenerator),
            RegistrationStore::memory_only(),
            2,
            300,
        );

        assert!(matches!(h.orchestrator.register("9").await, RegistrationOutcome::Failed { .. }));
        assert!(matches!(h.orchestrator.register("9").await, RegistrationOutcome::Failed { .. }));
        assert!(matches!(
            h.orchestrator.register("9").await,
            RegistrationOutcome::RateLimited { scope: LimitScope::PerUser, .. }
        ));
        assert_eq!(h.api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_global_limit_checked_before_downstream() {
        let h = harness_with(
            ScriptedApi::default(),
            Arc::new(RandomIdentityGenerator),
            RegistrationStore::memory_only(),
            3,
            1,
        );

        assert!(matches!(h.orchestrator.register("1").await, RegistrationOutcome::Success { .. }));
        assert!(matches!(
            h.orchestrator.register("2").await,
            RegistrationOutcome::RateLimited { scope: LimitScope::Global, .. }
        ));
        assert_eq!(h.api.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_for_one_user_register_once() {
        let api = ScriptedApi {
            delay: Duration::from_millis(200),
            ..Default::default()
        };
        let h = harness(api);

        let a = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.register("42").await })
        };
        let b = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.register("42").await })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(h.api.calls().len(), 1);
        let username = h.store.get("42").unwrap().username;
        let outcomes = [a, b];
        assert!(outcomes.iter().any(|o| matches!(o, RegistrationOutcome::Success { .. })));
        assert!(outcomes
            .iter()
            .any(|o| *o == RegistrationOutcome::AlreadyRegistered { username: username.clone() }));
        assert!(h.orchestrator.user_locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_semaphore_bounds_downstream_calls() {
        let api = ScriptedApi {
            delay: Duration::from_millis(100),
            ..Default::default()
        };
        let h = harness(api);

        let tasks: Vec<_> = (0..5)
            .map(|i| {
                let orchestrator = h.orchestrator.clone();
                tokio::spawn(async move { orchestrator.register(&i.to_string()).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.api.calls().len(), 2);
        assert_eq!(h.orchestrator.semaphore.in_flight(), 2);

        for task in tasks {
            assert!(matches!(task.await.unwrap(), RegistrationOutcome::Success { .. }));
        }
        assert_eq!(h.orchestrator.semaphore.in_flight(), 0);
    }
}
