use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DelayType
// ---------------------------------------------------------------------------

/// Which instant the next delay is measured from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayType {
    // ---
    /// From the instant the previous run was due, regardless of when it ran.
    FromPreviousScheduling,

    /// From the instant the previous run actually began.
    #[default]
    FromPreviousExecutionBegin,

    /// From the instant the previous run returned.
    FromPreviousExecutionCompletion,
}

// ---------------------------------------------------------------------------
// BackoffConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    // ---
    pub min_delay: Duration,
    pub max_delay: Duration,

    /// Multiplier applied after every [`BackoffTrigger::next_delay`]. `>= 1.0`.
    pub factor: f64,

    pub delay_type: DelayType,
}

// ---

impl Default for BackoffConfig {
    fn default() -> Self {
        // ---
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            factor: 1.1,
            delay_type: DelayType::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// Source of successive delays for a recurring scheduled task.
pub trait Trigger: Send + Sync {
    // ---
    fn next_delay(&self) -> Duration;

    fn delay_type(&self) -> DelayType {
        DelayType::default()
    }
}

// ---------------------------------------------------------------------------
// BackoffTrigger
// ---------------------------------------------------------------------------

/// Exponential delay with a ceiling, resettable to its initial value.
///
/// Drives both the steady manifest cadence (pushes get sparser while the
/// control channel is healthy) and reconnection after a channel error, which
/// calls [`BackoffTrigger::reset`] so the next attempt comes quickly.
///
/// Shared between the scheduler (reads) and the control actor (resets); the
/// inner mutex is never held across an await.
#[derive(Debug)]
pub struct BackoffTrigger {
    // ---
    config: BackoffConfig,
    current: Mutex<Duration>,
}

// ---

impl BackoffTrigger {
    // ---
    pub fn new(config: BackoffConfig) -> Self {
        // ---
        let initial = config.min_delay.min(config.max_delay);
        Self {
            config,
            current: Mutex::new(initial),
        }
    }

    // ---

    /// Restore the initial delay.
    pub fn reset(&self) {
        // ---
        let initial = self.initial_delay();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = initial;
    }

    // ---

    /// The delay the next [`Trigger::next_delay`] call will return.
    pub fn peek(&self) -> Duration {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---

    pub fn initial_delay(&self) -> Duration {
        self.config.min_delay.min(self.config.max_delay)
    }

    // ---

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

// ---

impl Trigger for BackoffTrigger {
    // ---
    fn next_delay(&self) -> Duration {
        // ---
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let delay = *current;
        let factor = self.config.factor.max(1.0);
        *current = delay.mul_f64(factor).min(self.config.max_delay);
        delay
    }

    fn delay_type(&self) -> DelayType {
        self.config.delay_type
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
