//! [`AdmissionGate`] — bounded permit pool over concurrent transfer channels.
//!
//! Permits are RAII values: a [`TransferPermit`] returns to the pool when it
//! is dropped, so each acquisition is released exactly once. The transfer
//! engine holds its permit until its terminal transition.
//!
//! `held + available == capacity` holds at all times; it is the semaphore's
//! own accounting.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// ---

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// TransferPermit
// ---------------------------------------------------------------------------

/// One slot in the gate. Released on drop.
#[derive(Debug)]
pub struct TransferPermit {
    // ---
    _permit: OwnedSemaphorePermit,
}

// ---------------------------------------------------------------------------
// DrainOutcome
// ---------------------------------------------------------------------------

/// Result of [`AdmissionGate::drain_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    // ---
    /// Permits now held by the gate itself.
    pub acquired: usize,
    pub capacity: usize,
}

// ---

impl DrainOutcome {
    // ---
    /// Every permit is held: no transfer is running and none can start.
    pub fn is_complete(&self) -> bool {
        self.acquired >= self.capacity
    }

    // ---

    /// Transfers still holding a permit when the drain gave up.
    pub fn outstanding(&self) -> usize {
        self.capacity.saturating_sub(self.acquired)
    }
}

// ---------------------------------------------------------------------------
// AdmissionGate
// ---------------------------------------------------------------------------

pub struct AdmissionGate {
    // ---
    semaphore: Arc<Semaphore>,
    capacity: usize,

    /// Longest single wait inside [`AdmissionGate::drain_all`].
    poll_interval: Duration,

    /// Permits taken by a drain. Kept for the gate's lifetime.
    drained: Mutex<Vec<OwnedSemaphorePermit>>,
}

// ---

impl AdmissionGate {
    // ---
    pub fn new(capacity: usize, poll_interval: Duration) -> Self {
        // ---
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            drained: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    // ---

    /// Take a permit if one is free. Never waits.
    pub fn try_acquire(&self) -> Option<TransferPermit> {
        // ---
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| TransferPermit { _permit: permit })
    }

    // ---

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // ---

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    // ---

    /// Permits currently out of the pool, including any taken by a drain.
    pub fn held(&self) -> usize {
        self.capacity - self.available()
    }

    // ---

    /// Acquire every permit, waiting for in-flight transfers to release
    /// theirs, for at most `timeout`.
    ///
    /// Waits in steps of at most the poll interval. Acquired permits stay
    /// with the gate; once the outcome is complete no new transfer can be
    /// admitted. An incomplete outcome means some transfers are still
    /// running and must be force-completed by the caller.
    pub async fn drain_all(&self, timeout: Duration) -> DrainOutcome {
        // ---
        let deadline = Instant::now() + timeout;
        let mut acquired = self.drained_count();

        while acquired < self.capacity {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = (deadline - now).min(self.poll_interval);

            match tokio::time::timeout(wait, Arc::clone(&self.semaphore).acquire_owned()).await {
                Ok(Ok(permit)) => {
                    self.drained
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(permit);
                    acquired += 1;
                }
                Ok(Err(_closed)) => break,
                Err(_elapsed) => {
                    tracing::trace!(acquired, capacity = self.capacity, "drain: still waiting");
                }
            }
        }

        DrainOutcome {
            acquired,
            capacity: self.capacity,
        }
    }

    // ---

    fn drained_count(&self) -> usize {
        self.drained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
