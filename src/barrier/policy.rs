use crate::barrier::{BarrierCommand, BarrierState, TransitionCause};
use crate::detection::DetectionHistory;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_CLOSE_STREAK: usize = 3;
pub const DEFAULT_CLOSE_CONFIDENCE: f64 = 0.7;
pub const DEFAULT_OPEN_STREAK: usize = 2;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT_BACKOFF: Duration = Duration::from_secs(2);

/// Hysteresis rules for moving the barrier.
///
/// Closing needs `close_streak` consecutive vehicle frames whose mean confidence
/// exceeds `close_confidence`. Opening only needs `open_streak` consecutive clear
/// frames, so the barrier never lingers once the crossing is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct DebouncePolicy {
    pub window: Duration,
    pub close_streak: usize,
    pub close_confidence: f64,
    pub open_streak: usize,
}

impl Default for DebouncePolicy {
    fn default() -> Self {
        Self {
            window: crate::detection::history::DEFAULT_WINDOW,
            close_streak: DEFAULT_CLOSE_STREAK,
            close_confidence: DEFAULT_CLOSE_CONFIDENCE,
            open_streak: DEFAULT_OPEN_STREAK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub command: BarrierCommand,
    pub cause: TransitionCause,
    /// Mean confidence over the streak that triggered the decision.
    pub mean_confidence: f64,
}

impl DebouncePolicy {
    /// Decide whether the current history warrants moving the barrier away from `state`.
    pub fn evaluate(&self, state: BarrierState, history: &DetectionHistory) -> Option<Decision> {
        match state {
            BarrierState::Up => {
                if !history.all_true_in_last_n(self.close_streak, |s| s.vehicle_present) {
                    return None;
                }
                let streak = history.last_n(self.close_streak);
                let mean_confidence = mean(streak.iter().map(|s| s.confidence));
                (mean_confidence > self.close_confidence).then_some(Decision {
                    command: BarrierCommand::Close,
                    cause: TransitionCause::VehicleDetected,
                    mean_confidence,
                })
            }
            BarrierState::Down => {
                if !history.all_true_in_last_n(self.open_streak, |s| !s.vehicle_present) {
                    return None;
                }
                let streak = history.last_n(self.open_streak);
                Some(Decision {
                    command: BarrierCommand::Open,
                    cause: TransitionCause::CrossingClear,
                    mean_confidence: mean(streak.iter().map(|s| s.confidence)),
                })
            }
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// What a final timed-out attempt means for the belief state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// The actuator is probably moving; advance belief and report degraded success.
    #[default]
    AssumeDelivered,
    /// Treat the timeout like an explicit failure.
    AssumeFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub failure_backoff: Duration,
    pub timeout_backoff: Duration,
    pub on_timeout: TimeoutPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            failure_backoff: DEFAULT_FAILURE_BACKOFF,
            timeout_backoff: DEFAULT_TIMEOUT_BACKOFF,
            on_timeout: TimeoutPolicy::AssumeDelivered,
        }
    }
}
