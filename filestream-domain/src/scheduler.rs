use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::backoff::Trigger;
use super::error::Result;

// ---------------------------------------------------------------------------
// ScheduledTask
// ---------------------------------------------------------------------------

/// A unit of scheduled work.
///
/// Synchronous and cheap: tasks hand work off to an actor queue rather than
/// doing I/O on the scheduler.
pub type ScheduledTask = Arc<dyn Fn() + Send + Sync>;

// ---------------------------------------------------------------------------
// ScheduledHandle
// ---------------------------------------------------------------------------

/// Cancellable handle to a scheduled (one-shot or recurring) task.
///
/// Cloning yields another handle to the same schedule.
#[derive(Debug, Clone)]
pub struct ScheduledHandle {
    // ---
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

// ---

impl ScheduledHandle {
    // ---
    /// Handle backed by a tokio task.
    pub fn new(abort: AbortHandle) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            abort: Some(abort),
        }
    }

    // ---

    /// Handle with no task behind it; schedulers that run tasks themselves
    /// poll [`ScheduledHandle::is_cancelled`].
    pub fn detached() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            abort: None,
        }
    }

    // ---

    /// Stop future runs. A run already executing is not interrupted.
    pub fn cancel(&self) {
        // ---
        self.cancelled.store(true, Ordering::Release);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    // ---

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Delayed and recurring task execution.
pub trait Scheduler: Send + Sync {
    // ---
    /// Run `task` once at `at` (immediately if `at` is in the past).
    fn schedule_at(&self, at: Instant, task: ScheduledTask) -> Result<ScheduledHandle>;

    /// Run `task` repeatedly; the first run and every subsequent run are
    /// delayed by successive [`Trigger::next_delay`] values.
    fn schedule_with_trigger(
        &self,
        trigger: Arc<dyn Trigger>,
        task: ScheduledTask,
    ) -> Result<ScheduledHandle>;
}

// ---

/// Convenience type alias for a shared [`Scheduler`].
pub type SchedulerPtr = Arc<dyn Scheduler>;
