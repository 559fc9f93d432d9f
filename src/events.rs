//! Barrier events and the sinks that carry them to dashboards.

use crate::barrier::{BarrierCommand, BarrierState, TransitionCause};
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

pub const DEFAULT_EVENT_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BarrierEvent {
    StateChanged {
        from: BarrierState,
        to: BarrierState,
        cause: TransitionCause,
    },
    CommandFailed {
        direction: BarrierCommand,
        attempts: u32,
        reason: String,
    },
    DegradedSuccess {
        direction: BarrierCommand,
        attempts: u32,
    },
    /// Per-frame telemetry.
    Detection {
        vehicle_present: bool,
        confidence: f64,
        state: BarrierState,
    },
}

impl BarrierEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            BarrierEvent::StateChanged { .. } => "state_changed",
            BarrierEvent::CommandFailed { .. } => "command_failed",
            BarrierEvent::DegradedSuccess { .. } => "degraded_success",
            BarrierEvent::Detection { .. } => "detection",
        }
    }
}

/// Receives events from the controller. Must not block and must not fail.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: BarrierEvent);
}

/// Fans events out to every connected subscriber; drops them when nobody listens.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<BarrierEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BarrierEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: BarrierEvent) {
        if let Ok(count) = self.tx.send(event) {
            debug!(subscribers = count, "Broadcast barrier event");
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<BarrierEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BarrierEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events other than per-frame telemetry.
    pub fn transitions(&self) -> Vec<BarrierEvent> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, BarrierEvent::Detection { .. }))
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: BarrierEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_changed_serializes_with_kind_tag() -> Result<(), serde_json::Error> {
        let event = BarrierEvent::StateChanged {
            from: BarrierState::Up,
            to: BarrierState::Down,
            cause: TransitionCause::VehicleDetected,
        };

        assert_eq!(
            serde_json::to_value(&event)?,
            json!({
                "kind": "state_changed",
                "from": "UP",
                "to": "DOWN",
                "cause": "vehicle_detected"
            })
        );
        assert_eq!(event.name(), "state_changed");
        Ok(())
    }

    #[test]
    fn broadcast_sink_delivers_to_subscribers() -> Result<(), Box<dyn std::error::Error>> {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();

        sink.publish(BarrierEvent::DegradedSuccess {
            direction: BarrierCommand::Close,
            attempts: 2,
        });

        let received = rx.try_recv()?;
        assert_eq!(received.name(), "degraded_success");
        Ok(())
    }

    #[test]
    fn broadcast_sink_without_subscribers_is_silent() {
        let sink = BroadcastSink::default();
        assert_eq!(sink.subscriber_count(), 0);
        sink.publish(BarrierEvent::CommandFailed {
            direction: BarrierCommand::Open,
            attempts: 2,
            reason: "refused".to_string(),
        });
    }
}
