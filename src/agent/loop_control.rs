use std::time::Instant;

use crate::config::LimitsConfig;

/// Why the loop was stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    DurationExceeded,
    TooManyFailures,
}

impl StopReason {
    pub fn message(&self) -> &'static str {
        match self {
            StopReason::DurationExceeded => "Session time limit reached",
            StopReason::TooManyFailures => "Too many consecutive action failures",
        }
    }
}

/// Runaway-session guard: caps wall-clock duration and consecutive action
/// failures. Any success resets the failure streak.
pub struct LoopController {
    limits: LimitsConfig,
    start_time: Instant,
    consecutive_failures: u32,
}

impl LoopController {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
            consecutive_failures: 0,
        }
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        tracing::warn!(
            consecutive = self.consecutive_failures,
            "action failure recorded"
        );
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn should_stop(&self) -> Option<StopReason> {
        if self.start_time.elapsed().as_secs() >= self.limits.max_loop_duration_secs {
            return Some(StopReason::DurationExceeded);
        }
        if self.consecutive_failures >= self.limits.max_consecutive_failures {
            return Some(StopReason::TooManyFailures);
        }
        None
    }
}
