//! Flow-control primitives shared by the registration path

pub mod rate_limiter;
pub mod semaphore;

pub use rate_limiter::{
    spawn_cleanup_task, Consumption, RateLimiter, RateLimiterConfig, GLOBAL_KEY,
};
pub use semaphore::{ConcurrencySemaphore, SlotGuard};
