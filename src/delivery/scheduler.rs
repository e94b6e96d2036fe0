//! Per-user debounced follow-up pushes
//!
//! At most one pending push per user. Scheduling again replaces the pending
//! timer, so a burst of triggers yields a single firing timed from the last
//! one. Each entry carries a generation number; a timer only removes the
//! entry it created.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::types::Result;

/// What a push does when its timer fires
#[async_trait]
pub trait PushAction: Send + Sync {
    async fn fire(&self, user_id: &str) -> Result<()>;
}

/// Delay bounds used when the caller gives none
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub delay_min: Duration,
    pub delay_max: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            delay_min: Duration::from_secs(10),
            delay_max: Duration::from_secs(20),
        }
    }
}

struct PendingPush {
    generation: u64,
    fire_at: Instant,
    handle: JoinHandle<()>,
}

struct Inner {
    pending: DashMap<String, PendingPush>,
    action: Arc<dyn PushAction>,
    config: SchedulerConfig,
    generations: AtomicU64,
}

/// Debounced per-user timer set
#[derive(Clone)]
pub struct DelayedPushScheduler {
    inner: Arc<Inner>,
}

impl DelayedPushScheduler {
    pub fn new(config: SchedulerConfig, action: Arc<dyn PushAction>) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: DashMap::new(),
                action,
                config,
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Schedule (or reschedule) the push for `user_id`
    ///
    /// Returns the delay actually used.
    pub fn schedule_push(&self, user_id: &str, delay: Option<Duration>) -> Duration {
        let delay = delay.unwrap_or_else(|| self.random_delay());
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let fire_at = Instant::now() + delay;

        // The shard stays locked until the new entry is in place, so the new
        // timer cannot look for its entry before it exists.
        let slot = self.inner.pending.entry(user_id.to_string());
        let handle = tokio::spawn(fire_after(
            Arc::clone(&self.inner),
            user_id.to_string(),
            generation,
            fire_at,
        ));
        let pending = PendingPush {
            generation,
            fire_at,
            handle,
        };
        let replaced = match slot {
            Entry::Occupied(mut occupied) => {
                occupied.insert(pending).handle.abort();
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(pending);
                false
            }
        };

        if replaced {
            debug!(user_id, "Replaced pending push");
        }
        info!(user_id, delay_ms = delay.as_millis() as u64, "Scheduled push");
        delay
    }

    /// Cancel the pending push for `user_id`, if any
    pub fn cancel_push(&self, user_id: &str) -> bool {
        match self.inner.pending.remove(user_id) {
            Some((_, pending)) => {
                pending.handle.abort();
                info!(user_id, "Cancelled push");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, user_id: &str) -> bool {
        self.inner.pending.contains_key(user_id)
    }

    /// When the pending push for `user_id` will fire
    pub fn fire_at(&self, user_id: &str) -> Option<Instant> {
        self.inner.pending.get(user_id).map(|p| p.fire_at)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    fn random_delay(&self) -> Duration {
        let SchedulerConfig {
            delay_min,
            delay_max,
        } = self.inner.config;
        if delay_max <= delay_min {
            return delay_min;
        }
        rand::thread_rng().gen_range(delay_min..=delay_max)
    }
}

async fn fire_after(inner: Arc<Inner>, user_id: String, generation: u64, fire_at: Instant) {
    tokio::time::sleep_until(fire_at).await;

    // Claim the entry before running so a reschedule during the send starts
    // a fresh timer instead of being removed afterwards.
    let claimed = inner
        .pending
        .remove_if(&user_id, |_, pending| pending.generation == generation)
        .is_some();
    if !claimed {
        return;
    }

    match inner.action.fire(&user_id).await {
        Ok(()) => info!(user_id = %user_id, "Push delivered"),
        Err(e) => warn!(user_id = %user_id, "Push failed: {}", e),
    }
}
