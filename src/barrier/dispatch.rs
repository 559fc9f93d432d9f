use crate::actuator::{ActuatorTransport, SendOutcome};
use crate::barrier::BarrierCommand;
use crate::barrier::policy::{RetryPolicy, TimeoutPolicy};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Book-keeping for the one command currently in flight.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub command: BarrierCommand,
    pub issued_at: Instant,
    pub attempts: u32,
    pub attempt_timeout: Duration,
}

impl PendingCommand {
    pub fn new(command: BarrierCommand, attempt_timeout: Duration) -> Self {
        Self {
            command,
            issued_at: Instant::now(),
            attempts: 0,
            attempt_timeout,
        }
    }
}

/// Terminal result of a command after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The actuator acknowledged the command.
    Confirmed { attempts: u32 },
    /// Every attempt ended in a timeout; the command probably reached the actuator.
    AssumedDelivered { attempts: u32 },
    Failed { attempts: u32, reason: String },
}

impl CommandOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            CommandOutcome::Confirmed { attempts }
            | CommandOutcome::AssumedDelivered { attempts }
            | CommandOutcome::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Deliver `pending.command`, retrying per `policy`. Blocks the calling thread
/// for up to `max_attempts * (attempt_timeout + backoff)`.
pub fn send_with_retries(
    transport: &dyn ActuatorTransport,
    pending: &mut PendingCommand,
    policy: &RetryPolicy,
) -> CommandOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let command = pending.command;

    loop {
        pending.attempts += 1;
        let attempt = pending.attempts;
        let remaining = attempt < max_attempts;

        match transport.send(command, pending.attempt_timeout) {
            SendOutcome::Success => {
                info!(?command, attempt, "Barrier command acknowledged");
                return CommandOutcome::Confirmed { attempts: attempt };
            }
            SendOutcome::Failure(reason) => {
                warn!(?command, attempt, max_attempts, error = %reason, "Barrier command rejected");
                if !remaining {
                    return CommandOutcome::Failed {
                        attempts: attempt,
                        reason,
                    };
                }
                std::thread::sleep(policy.failure_backoff);
            }
            SendOutcome::Timeout => {
                warn!(
                    ?command,
                    attempt,
                    max_attempts,
                    timeout_ms = pending.attempt_timeout.as_millis(),
                    "Barrier command timed out"
                );
                if !remaining {
                    return match policy.on_timeout {
                        TimeoutPolicy::AssumeDelivered => {
                            warn!(?command, "Assuming command delivered, actuator may be slow to acknowledge");
                            CommandOutcome::AssumedDelivered { attempts: attempt }
                        }
                        TimeoutPolicy::AssumeFailed => CommandOutcome::Failed {
                            attempts: attempt,
                            reason: "timed out".to_string(),
                        },
                    };
                }
                std::thread::sleep(policy.timeout_backoff);
            }
        }
    }
}
