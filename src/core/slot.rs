//! Single-slot admission gate in front of the inference engine.
//!
//! The engine runs one decode at a time. Requests wait on a one-permit
//! semaphore, which tokio hands out in FIFO order, so admission follows
//! arrival and no waiter starves. The permit is an RAII guard: whatever way
//! a request ends, dropping the guard frees the slot for the next one.

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::error::SlotError;
use crate::observability::metrics::Metrics;

#[derive(Debug)]
pub struct InferenceSlot {
    semaphore: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    acquisitions: AtomicU64,
    max_queued: Option<usize>,
}

impl InferenceSlot {
    /// `max_queued` bounds how many requests may wait while the slot is
    /// busy; `None` lets the queue grow without limit.
    pub fn new(max_queued: Option<usize>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            waiting: Arc::new(AtomicUsize::new(0)),
            acquisitions: AtomicU64::new(0),
            max_queued,
        }
    }

    /// Wait for the slot.
    ///
    /// Cancel-safe: a caller dropped while queued simply leaves the queue.
    pub async fn acquire(&self) -> Result<SlotPermit, SlotError> {
        let started = Instant::now();
        let permit = {
            let _queued = QueueGuard::reserve(
                Arc::clone(&self.waiting),
                self.max_queued,
                self.is_busy(),
            )?;
            Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| SlotError::Closed)?
        };
        let waited = started.elapsed();

        self.acquisitions.fetch_add(1, Ordering::AcqRel);
        Metrics::record_slot_wait(waited);
        Metrics::set_slot_busy(true);
        debug!(waited_ms = waited.as_millis() as u64, "Acquired inference slot");

        Ok(SlotPermit {
            _permit: permit,
            acquired_at: Instant::now(),
        })
    }

    /// Number of times the slot has been granted since startup.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Acquire)
    }

    /// Requests currently queued for the slot.
    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

/// Counts a request as queued for as long as it is alive.
struct QueueGuard {
    waiting: Arc<AtomicUsize>,
}

impl QueueGuard {
    /// Take a place in the queue. The bound check and the increment are one
    /// atomic step, so simultaneous arrivals cannot overshoot `limit`.
    fn reserve(
        waiting: Arc<AtomicUsize>,
        limit: Option<usize>,
        busy: bool,
    ) -> Result<Self, SlotError> {
        let previous = waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match limit {
                Some(limit) if busy && current >= limit => None,
                _ => Some(current + 1),
            })
            .map_err(|current| SlotError::QueueFull {
                waiting: current,
                limit: limit.unwrap_or_default(),
            })?;
        Metrics::set_slot_queue_depth(previous + 1);
        Ok(Self { waiting })
    }
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        let depth = self.waiting.fetch_sub(1, Ordering::AcqRel) - 1;
        Metrics::set_slot_queue_depth(depth);
    }
}

/// Exclusive use of the engine. Released on drop.
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
    acquired_at: Instant,
}

impl SlotPermit {
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        Metrics::set_slot_busy(false);
        debug!(
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Released inference slot"
        );
    }
}
