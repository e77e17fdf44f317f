//! [`TokioScheduler`] — [`Scheduler`] on the tokio runtime.
//!
//! Every schedule is one spawned task that sleeps until the due instant and
//! calls the task closure. Cancelling aborts the spawned task.

use std::sync::Arc;

// ---

use tokio::runtime::Handle;
use tokio::time::Instant;

// ---

use filestream_domain::{
    // ---
    DelayType,
    FileStreamError,
    Result,
    ScheduledHandle,
    ScheduledTask,
    Scheduler,
    Trigger,
};

// ---------------------------------------------------------------------------
// TokioScheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TokioScheduler {
    // ---
    runtime: Handle,
}

// ---

impl TokioScheduler {
    // ---
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    // ---

    /// Scheduler on the runtime the caller is running in.
    pub fn current() -> Result<Self> {
        // ---
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| FileStreamError::Scheduler(e.to_string()))
    }
}

// ---

impl Scheduler for TokioScheduler {
    // ---
    fn schedule_at(&self, at: Instant, task: ScheduledTask) -> Result<ScheduledHandle> {
        // ---
        let join = self.runtime.spawn(async move {
            tokio::time::sleep_until(at).await;
            task();
        });
        Ok(ScheduledHandle::new(join.abort_handle()))
    }

    // ---

    fn schedule_with_trigger(
        &self,
        trigger: Arc<dyn Trigger>,
        task: ScheduledTask,
    ) -> Result<ScheduledHandle> {
        // ---
        let join = self.runtime.spawn(async move {
            // ---
            let mut due = Instant::now() + trigger.next_delay();
            loop {
                tokio::time::sleep_until(due).await;

                let began = Instant::now();
                task();

                let delay = trigger.next_delay();
                due = match trigger.delay_type() {
                    DelayType::FromPreviousScheduling => due + delay,
                    DelayType::FromPreviousExecutionBegin => began + delay,
                    DelayType::FromPreviousExecutionCompletion => Instant::now() + delay,
                };
                tracing::trace!(delay_ms = delay.as_millis() as u64, "scheduler: next run");
            }
        });
        Ok(ScheduledHandle::new(join.abort_handle()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
