use serde::{Deserialize, Serialize};
use std::fmt;

pub mod controller;
pub mod dispatch;
pub mod policy;

pub use controller::{BarrierController, CommandHandle, ControllerSnapshot, ObserveOutcome};
pub use dispatch::CommandOutcome;
pub use policy::{DebouncePolicy, Decision, RetryPolicy, TimeoutPolicy};

/// Believed position of the crossing barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BarrierState {
    Up,
    Down,
}

impl fmt::Display for BarrierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BarrierState::Up => f.write_str("UP"),
            BarrierState::Down => f.write_str("DOWN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarrierCommand {
    Open,
    Close,
}

impl BarrierCommand {
    /// State the barrier is in once this command has been carried out.
    pub fn target(self) -> BarrierState {
        match self {
            BarrierCommand::Open => BarrierState::Up,
            BarrierCommand::Close => BarrierState::Down,
        }
    }

    /// Value understood by the barrier controller firmware.
    pub fn wire_value(self) -> &'static str {
        match self {
            BarrierCommand::Open => "up",
            BarrierCommand::Close => "down",
        }
    }
}

/// Why a state change happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    VehicleDetected,
    CrossingClear,
    Manual,
    Reconciled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_targets_match_barrier_positions() {
        assert_eq!(BarrierCommand::Open.target(), BarrierState::Up);
        assert_eq!(BarrierCommand::Close.target(), BarrierState::Down);
        assert_eq!(BarrierCommand::Close.wire_value(), "down");
    }

    #[test]
    fn state_serializes_uppercase() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&BarrierState::Down)?, "\"DOWN\"");
        let parsed: BarrierState = serde_json::from_str("\"UP\"")?;
        assert_eq!(parsed, BarrierState::Up);
        Ok(())
    }
}
