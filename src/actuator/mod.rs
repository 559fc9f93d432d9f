use crate::barrier::BarrierCommand;
use serde::Deserialize;
use std::time::Duration;

pub mod http;
pub mod mock;
pub mod mqtt;

/// Which link carries barrier commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    #[default]
    Http,
    Mqtt,
}

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    Failure(String),
    Timeout,
}

/// Delivers barrier commands to the physical actuator.
///
/// Implementations block for at most `timeout` and report a timeout as
/// [`SendOutcome::Timeout`] rather than as a failure.
pub trait ActuatorTransport: Send + Sync {
    fn send(&self, command: BarrierCommand, timeout: Duration) -> SendOutcome;
}
