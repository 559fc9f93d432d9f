//! The debounced decision engine.
//!
//! [`BarrierController::observe`] runs history mutation, policy evaluation and the
//! dispatch decision under one mutex. The actuator round-trip itself runs on a
//! worker thread so a slow or unreachable actuator never stalls the frame loop.
//! At most one command is in flight at any time; observations that would start a
//! second one are skipped and re-evaluated on the next frame.
//!
//! Events leave the controller in the order of the state changes that produced
//! them: the publish gate is taken before the core lock is released.

use crate::actuator::ActuatorTransport;
use crate::barrier::dispatch::{self, CommandOutcome, PendingCommand};
use crate::barrier::policy::{DebouncePolicy, RetryPolicy};
use crate::barrier::{BarrierCommand, BarrierState, TransitionCause};
use crate::detection::{DetectionHistory, DetectionSample};
use crate::error::AppError;
use crate::events::{BarrierEvent, EventSink};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub debounce: DebouncePolicy,
    pub retry: RetryPolicy,
    pub initial_state: BarrierState,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            debounce: DebouncePolicy::default(),
            retry: RetryPolicy::default(),
            initial_state: BarrierState::Up,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ControllerStats {
    pub frames_observed: u64,
    pub vehicle_frames: u64,
    pub commands_issued: u64,
    pub commands_confirmed: u64,
    pub commands_degraded: u64,
    pub commands_failed: u64,
    pub skipped_in_flight: u64,
}

/// Point-in-time copy of the controller, taken under its lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub state: BarrierState,
    pub pending: Option<BarrierCommand>,
    pub history_len: usize,
    pub stats: ControllerStats,
}

#[derive(Debug)]
pub enum ObserveOutcome {
    /// Nothing to do for this frame.
    Idle,
    /// A command was started on a worker thread.
    Dispatched(CommandHandle),
    /// The policy asked for a command but another one is still in flight.
    Skipped { in_flight: BarrierCommand },
}

impl ObserveOutcome {
    pub fn into_handle(self) -> Option<CommandHandle> {
        match self {
            ObserveOutcome::Dispatched(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Handle on a command running on its worker thread.
#[derive(Debug)]
pub struct CommandHandle {
    command: BarrierCommand,
    handle: JoinHandle<CommandOutcome>,
}

impl CommandHandle {
    pub fn command(&self) -> BarrierCommand {
        self.command
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the command to finish. The controller state and events are
    /// already updated when this returns.
    pub fn join(self) -> Result<CommandOutcome, AppError> {
        self.handle.join().map_err(|_| AppError::WorkerPanicked)
    }
}

struct Core {
    state: BarrierState,
    history: DetectionHistory,
    pending: Option<PendingCommand>,
    // Bumped by every reconcile so late assumptions cannot override ground truth.
    epoch: u64,
    stats: ControllerStats,
}

struct Shared {
    core: Mutex<Core>,
    // Always acquired while holding `core`, never the other way round.
    publish_gate: Mutex<()>,
    debounce: DebouncePolicy,
    retry: RetryPolicy,
    transport: Arc<dyn ActuatorTransport>,
    sink: Arc<dyn EventSink>,
}

struct Job {
    pending: PendingCommand,
    cause: TransitionCause,
    epoch: u64,
}

enum Step {
    Idle,
    Skip(BarrierCommand),
    Start(Job),
}

#[derive(Clone)]
pub struct BarrierController {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for BarrierController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarrierController")
            .field("debounce", &self.shared.debounce)
            .field("retry", &self.shared.retry)
            .finish()
    }
}

impl BarrierController {
    pub fn new(
        config: ControllerConfig,
        transport: Arc<dyn ActuatorTransport>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let core = Core {
            state: config.initial_state,
            history: DetectionHistory::new(config.debounce.window),
            pending: None,
            epoch: 0,
            stats: ControllerStats::default(),
        };
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                publish_gate: Mutex::new(()),
                debounce: config.debounce,
                retry: config.retry,
                transport,
                sink,
            }),
        }
    }

    /// Feed one classified frame into the debounce engine.
    pub fn observe(&self, sample: DetectionSample) -> ObserveOutcome {
        let sample = sample.sanitized();
        let mut core = self.lock_core();
        core.history.append(sample);
        core.stats.frames_observed += 1;
        if sample.vehicle_present {
            core.stats.vehicle_frames += 1;
        }

        let telemetry = BarrierEvent::Detection {
            vehicle_present: sample.vehicle_present,
            confidence: sample.confidence,
            state: core.state,
        };

        let step = match self.shared.debounce.evaluate(core.state, &core.history) {
            None => Step::Idle,
            Some(decision) => match core.pending.as_ref().map(|p| p.command) {
                Some(in_flight) => {
                    core.stats.skipped_in_flight += 1;
                    debug!(
                        wanted = ?decision.command,
                        ?in_flight,
                        "Command already in flight, skipping decision"
                    );
                    Step::Skip(in_flight)
                }
                None => {
                    info!(
                        command = ?decision.command,
                        cause = ?decision.cause,
                        mean_confidence = decision.mean_confidence,
                        state = %core.state,
                        "Debounce threshold reached"
                    );
                    Step::Start(self.begin(&mut core, decision.command, decision.cause))
                }
            },
        };
        self.publish_in_order(core, [telemetry]);

        match step {
            Step::Idle => ObserveOutcome::Idle,
            Step::Skip(in_flight) => ObserveOutcome::Skipped { in_flight },
            Step::Start(job) => ObserveOutcome::Dispatched(self.spawn(job)),
        }
    }

    /// Operator-issued command, sent through the same retry path as automatic ones.
    pub fn command(&self, command: BarrierCommand) -> Result<CommandHandle, AppError> {
        let mut core = self.lock_core();
        if let Some(pending) = core.pending.as_ref() {
            return Err(AppError::CommandInFlight(pending.command));
        }
        info!(?command, state = %core.state, "Manual barrier command");
        let job = self.begin(&mut core, command, TransitionCause::Manual);
        drop(core);
        Ok(self.spawn(job))
    }

    /// Overwrite the belief state with an externally observed position.
    /// Returns the belief that was replaced.
    pub fn reconcile(&self, observed: BarrierState) -> BarrierState {
        let mut core = self.lock_core();
        core.epoch += 1;
        let from = std::mem::replace(&mut core.state, observed);

        if from == observed {
            drop(core);
            debug!(state = %observed, "Reconcile matches belief");
            return from;
        }
        info!(from = %from, to = %observed, "Barrier state reconciled from status report");
        self.publish_in_order(
            core,
            [BarrierEvent::StateChanged {
                from,
                to: observed,
                cause: TransitionCause::Reconciled,
            }],
        );
        from
    }

    pub fn state(&self) -> BarrierState {
        self.lock_core().state
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let core = self.lock_core();
        ControllerSnapshot {
            state: core.state,
            pending: core.pending.as_ref().map(|p| p.command),
            history_len: core.history.len(),
            stats: core.stats,
        }
    }

    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.shared.core.lock().unwrap_or_else(|poisoned| {
            warn!("Controller lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Hand the core lock over to the publish gate, then publish.
    fn publish_in_order<I>(&self, core: MutexGuard<'_, Core>, events: I)
    where
        I: IntoIterator<Item = BarrierEvent>,
    {
        let gate = self
            .shared
            .publish_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        drop(core);
        for event in events {
            self.shared.sink.publish(event);
        }
        drop(gate);
    }

    fn begin(&self, core: &mut Core, command: BarrierCommand, cause: TransitionCause) -> Job {
        let pending = PendingCommand::new(command, self.shared.retry.attempt_timeout);
        core.pending = Some(pending.clone());
        core.stats.commands_issued += 1;
        Job {
            pending,
            cause,
            epoch: core.epoch,
        }
    }

    fn spawn(&self, job: Job) -> CommandHandle {
        let command = job.pending.command;
        let controller = self.clone();
        let handle = std::thread::spawn(move || controller.run(job));
        CommandHandle { command, handle }
    }

    fn run(&self, job: Job) -> CommandOutcome {
        let Job {
            mut pending,
            cause,
            epoch,
        } = job;
        let transport = Arc::clone(&self.shared.transport);
        let retry = &self.shared.retry;

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            dispatch::send_with_retries(transport.as_ref(), &mut pending, retry)
        }))
        .unwrap_or_else(|_| {
            error!(command = ?pending.command, "Actuator transport panicked");
            CommandOutcome::Failed {
                attempts: pending.attempts,
                reason: "transport panicked".to_string(),
            }
        });

        self.complete(&pending, cause, epoch, &outcome);
        outcome
    }

    fn complete(
        &self,
        pending: &PendingCommand,
        cause: TransitionCause,
        epoch: u64,
        outcome: &CommandOutcome,
    ) {
        let direction = pending.command;
        let target = direction.target();
        let mut events = Vec::with_capacity(2);
        let mut core = self.lock_core();
        core.pending = None;
        let from = core.state;

        match outcome {
            CommandOutcome::Confirmed { .. } => {
                core.stats.commands_confirmed += 1;
                core.state = target;
            }
            CommandOutcome::AssumedDelivered { .. } => {
                core.stats.commands_degraded += 1;
                if core.epoch == epoch {
                    core.state = target;
                } else {
                    info!(
                        ?direction,
                        state = %core.state,
                        "State reconciled while command was in flight, keeping reported state"
                    );
                }
            }
            CommandOutcome::Failed { .. } => {
                core.stats.commands_failed += 1;
            }
        }

        if core.state != from {
            info!(
                from = %from,
                to = %core.state,
                ?cause,
                elapsed_ms = pending.issued_at.elapsed().as_millis(),
                "Barrier state changed"
            );
            events.push(BarrierEvent::StateChanged {
                from,
                to: core.state,
                cause,
            });
        }

        match outcome {
            CommandOutcome::Confirmed { .. } => {}
            CommandOutcome::AssumedDelivered { attempts } => {
                events.push(BarrierEvent::DegradedSuccess {
                    direction,
                    attempts: *attempts,
                });
            }
            CommandOutcome::Failed { attempts, reason } => {
                warn!(?direction, attempts, error = %reason, "Barrier command failed, belief unchanged");
                events.push(BarrierEvent::CommandFailed {
                    direction,
                    attempts: *attempts,
                    reason: reason.clone(),
                });
            }
        }

        self.publish_in_order(core, events);
    }
}
