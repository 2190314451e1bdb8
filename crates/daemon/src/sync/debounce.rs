// Autosave debouncer.
//
// Coalesces bursts of local edits into a single write attempt once the
// document has been quiet for the configured window (default 1500ms,
// range 100–10000ms). Every `schedule` restarts the window and replaces
// the payload, so the run that eventually fires sees the latest value.
//
// The debouncer never reads a clock itself: callers pass `now`, which
// keeps it deterministic under test.

use std::time::{Duration, Instant};

/// Default quiescence window.
const DEFAULT_DEBOUNCE_MS: u64 = 1_500;
/// Minimum allowed window.
const MIN_DEBOUNCE_MS: u64 = 100;
/// Maximum allowed window.
const MAX_DEBOUNCE_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    pub window: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { window: Duration::from_millis(DEFAULT_DEBOUNCE_MS) }
    }
}

impl DebounceConfig {
    /// Create a config with the given window in milliseconds, clamped to [100, 10000].
    pub fn with_millis(ms: u64) -> Self {
        let clamped = ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);
        Self { window: Duration::from_millis(clamped) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DebounceState<T> {
    Idle,
    Armed { deadline: Instant, payload: T },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    config: DebounceConfig,
    state: DebounceState<T>,
}

impl<T> Debouncer<T> {
    pub fn new(config: DebounceConfig) -> Self {
        Self { config, state: DebounceState::Idle }
    }

    pub fn window(&self) -> Duration {
        self.config.window
    }

    /// Arm (or re-arm) the timer at `now + window` with `payload`.
    pub fn schedule_at(&mut self, now: Instant, payload: T) {
        self.state = DebounceState::Armed { deadline: now + self.config.window, payload };
    }

    /// Abandon the pending run without running it.
    pub fn cancel(&mut self) {
        if matches!(self.state, DebounceState::Armed { .. }) {
            self.state = DebounceState::Cancelled;
        }
    }

    /// Take the pending payload immediately, regardless of the deadline.
    pub fn flush(&mut self) -> Option<T> {
        self.take_armed()
    }

    /// Take the pending payload if its deadline has passed.
    pub fn poll_at(&mut self, now: Instant) -> Option<T> {
        match self.state {
            DebounceState::Armed { deadline, .. } if now >= deadline => self.take_armed(),
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            DebounceState::Armed { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    pub fn pending(&self) -> Option<&T> {
        match &self.state {
            DebounceState::Armed { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, DebounceState::Armed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.state, DebounceState::Cancelled)
    }

    fn take_armed(&mut self) -> Option<T> {
        match std::mem::replace(&mut self.state, DebounceState::Idle) {
            DebounceState::Armed { payload, .. } => Some(payload),
            other => {
                self.state = other;
                None
            }
        }
    }
}
