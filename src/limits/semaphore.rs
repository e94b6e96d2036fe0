//! Concurrency bound for downstream calls
//!
//! Thin wrapper over tokio's fair semaphore: waiters are served in arrival
//! order and the slot is returned when the guard drops, on every exit path.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::types::{GatekeeperError, Result};

/// Bounds the number of simultaneous in-flight operations
#[derive(Clone)]
pub struct ConcurrencySemaphore {
    inner: Arc<Semaphore>,
    max: usize,
}

/// Held slot; dropping it releases the slot and wakes the oldest waiter
#[must_use = "the slot is released as soon as the guard is dropped"]
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencySemaphore {
    pub fn new(max: usize) -> Self {
        Self {
            inner: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<SlotGuard> {
        let permit = Arc::clone(&self.inner)
            .acquire_owned()
            .await
            .map_err(|_| GatekeeperError::Internal("Concurrency semaphore closed".into()))?;
        Ok(SlotGuard { _permit: permit })
    }

    /// Slots currently held
    pub fn in_flight(&self) -> usize {
        self.max - self.inner.available_permits()
    }
}
