//! Fixed-window point budget limiter
//!
//! Each key owns a window of `points` over `duration`. A window starts on the
//! first consumption for its key and is replenished wholesale once it has
//! elapsed; there is no smooth leak between boundaries. The limiter never
//! blocks: a rejection tells the caller how long until the window resets.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Key used by the system-wide limiter
pub const GLOBAL_KEY: &str = "global";

/// Limiter configuration
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Points available per window
    pub points: u32,
    /// Window length
    pub duration: Duration,
}

impl RateLimiterConfig {
    pub fn new(points: u32, duration_secs: u64) -> Self {
        Self {
            points,
            duration: Duration::from_secs(duration_secs),
        }
    }
}

/// Result of a consume call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumption {
    /// A point was deducted
    Allowed { remaining: u32 },
    /// Budget exhausted for the current window
    Rejected { retry_after: Duration },
}

impl Consumption {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Consumption::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    consumed: u32,
    started_at: Instant,
}

/// Per-key fixed-window limiter
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    /// Try to deduct one point from `key`'s current window
    pub fn consume(&self, key: &str) -> Consumption {
        let now = Instant::now();
        let mut window = self.windows.entry(key.to_string()).or_insert(Window {
            consumed: 0,
            started_at: now,
        });

        if now.duration_since(window.started_at) >= self.config.duration {
            window.consumed = 0;
            window.started_at = now;
        }

        if window.consumed >= self.config.points {
            let retry_after = (window.started_at + self.config.duration).saturating_duration_since(now);
            debug!(key, ?retry_after, "Rate limit exhausted");
            return Consumption::Rejected { retry_after };
        }

        window.consumed += 1;
        Consumption::Allowed {
            remaining: self.config.points - window.consumed,
        }
    }

    /// Drop windows that have fully elapsed, returning how many were removed
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now.duration_since(window.started_at) < self.config.duration);
        before.saturating_sub(self.windows.len())
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

/// Spawn a background task that prunes expired windows
pub fn spawn_cleanup_task(limiters: Vec<Arc<RateLimiter>>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            for limiter in &limiters {
                let removed = limiter.cleanup();
                if removed > 0 {
                    debug!("Rate limiter cleanup: removed {} expired windows", removed);
                }
            }
        }
    });
    info!("Rate limiter cleanup task started");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausts_and_replenishes() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(3, 60));

        assert_eq!(limiter.consume("42"), Consumption::Allowed { remaining: 2 });
        assert_eq!(limiter.consume("42"), Consumption::Allowed { remaining: 1 });
        assert_eq!(limiter.consume("42"), Consumption::Allowed { remaining: 0 });
        assert!(!limiter.consume("42").is_allowed());

        tokio::time::advance(Duration::from_secs(59)).await;
        match limiter.consume("42") {
            Consumption::Rejected { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(1));
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(1)).await;
        for _ in 0..3 {
            assert!(limiter.consume("42").is_allowed());
        }
        assert!(!limiter.consume("42").is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1, 60));
        assert!(limiter.consume("a").is_allowed());
        assert!(!limiter.consume("a").is_allowed());
        assert!(limiter.consume("b").is_allowed());
        assert!(limiter.consume(GLOBAL_KEY).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_do_not_extend_window() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1, 10));
        assert!(limiter.consume("a").is_allowed());
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(1)).await;
            assert!(!limiter.consume("a").is_allowed());
        }
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.consume("a").is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_elapsed_windows() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(5, 10));
        limiter.consume("a");
        tokio::time::advance(Duration::from_secs(6)).await;
        limiter.consume("b");
        assert_eq!(limiter.tracked_keys(), 2);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(limiter.cleanup(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
