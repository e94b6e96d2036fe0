//! Positive-only membership cache
//!
//! Confirmed memberships are cached for a TTL; negative answers and query
//! failures are never stored, so a user who has just joined is re-checked
//! live on the very next call.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::types::Result;

/// Statuses that count as membership
pub const POSITIVE_STATUSES: &[&str] = &["creator", "administrator", "member", "restricted"];

pub fn is_positive(status: &str) -> bool {
    POSITIVE_STATUSES.contains(&status)
}

/// Live membership lookup (allows mocking in tests)
#[async_trait]
pub trait MembershipQuery: Send + Sync {
    /// Raw status of `user_id` in `group_id`
    async fn member_status(&self, group_id: i64, user_id: &str) -> Result<String>;
}

/// Configuration for the membership cache
#[derive(Debug, Clone)]
pub struct MembershipCacheConfig {
    /// Groups a user must belong to (any one suffices); empty disables gating
    pub required_groups: Vec<String>,
    /// How long a confirmed membership is trusted
    pub ttl: Duration,
}

impl Default for MembershipCacheConfig {
    fn default() -> Self {
        Self {
            required_groups: Vec::new(),
            ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedMembership {
    status: String,
    observed_at: Instant,
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipStats {
    pub hits: u64,
    pub live_queries: u64,
    pub query_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    live_queries: AtomicU64,
    query_errors: AtomicU64,
}

pub struct MembershipCache {
    entries: DashMap<(i64, String), CachedMembership>,
    groups: Vec<i64>,
    ttl: Duration,
    query: Arc<dyn MembershipQuery>,
    counters: Counters,
}

impl MembershipCache {
    pub fn new(config: MembershipCacheConfig, query: Arc<dyn MembershipQuery>) -> Self {
        let groups = config
            .required_groups
            .iter()
            .filter_map(|raw| match raw.trim().parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!("Ignoring non-numeric required group id {:?}", raw);
                    None
                }
            })
            .collect();

        Self {
            entries: DashMap::new(),
            groups,
            ttl: config.ttl,
            query,
            counters: Counters::default(),
        }
    }

    /// Whether membership gating is active
    pub fn is_enabled(&self) -> bool {
        !self.groups.is_empty()
    }

    /// True as soon as any required group confirms membership
    pub async fn is_member(&self, user_id: &str) -> bool {
        if self.groups.is_empty() {
            return true;
        }

        for &group_id in &self.groups {
            if self.cached_positive(group_id, user_id) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return true;
            }

            self.counters.live_queries.fetch_add(1, Ordering::Relaxed);
            match self.query.member_status(group_id, user_id).await {
                Ok(status) if is_positive(&status) => {
                    self.entries.insert(
                        (group_id, user_id.to_string()),
                        CachedMembership {
                            status,
                            observed_at: Instant::now(),
                        },
                    );
                    return true;
                }
                Ok(status) => {
                    debug!(group_id, user_id, status = %status, "Not a member");
                }
                Err(e) => {
                    self.counters.query_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(group_id, user_id, "Membership query failed: {}", e);
                }
            }
        }

        false
    }

    fn cached_positive(&self, group_id: i64, user_id: &str) -> bool {
        let key = (group_id, user_id.to_string());
        let usable = self.entries.get(&key).map(|entry| self.is_usable(&entry));

        match usable {
            Some(true) => true,
            Some(false) => {
                // A fresh positive may have landed since the read guard dropped
                self.entries.remove_if(&key, |_, entry| !self.is_usable(entry));
                false
            }
            None => false,
        }
    }

    fn is_usable(&self, entry: &CachedMembership) -> bool {
        entry.observed_at.elapsed() < self.ttl && is_positive(&entry.status)
    }

    /// Drop entries past their TTL, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| self.is_usable(entry));
        before.saturating_sub(self.entries.len())
    }

    pub fn stats(&self) -> MembershipStats {
        MembershipStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            live_queries: self.counters.live_queries.load(Ordering::Relaxed),
            query_errors: self.counters.query_errors.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Spawn a background task that purges expired memberships
pub fn spawn_purge_task(cache: Arc<MembershipCache>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = cache.purge_expired();
            if removed > 0 {
                debug!("Membership cache purge: removed {} expired entries", removed);
            }
        }
    });
    info!("Membership cache purge task started");
}
