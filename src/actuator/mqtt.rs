//! MQTT barrier transport.
//!
//! Commands go out as `{"status":"Tertutup"}` (close) or `{"status":"Terbuka"}`
//! (open). The barrier node reports its position with the same payloads on the
//! status topic; those reports are handed to the controller as reconciliations.

use crate::actuator::{ActuatorTransport, SendOutcome};
use crate::barrier::{BarrierCommand, BarrierController, BarrierState};
use rumqttc::{Client, ConnectReturnCode, Connection, Event, MqttOptions, Packet, QoS, Transport};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_MQTT_PORT: u16 = 8883;
pub const DEFAULT_CLIENT_ID: &str = "crossing-guard";
pub const DEFAULT_TOPIC: &str = "smarttrain/palang";
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

const CLOSED_STATUS: &str = "Tertutup";
const OPEN_STATUS: &str = "Terbuka";
const REQUEST_CAPACITY: usize = 10;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Topic commands are published on
    pub topic: String,
    /// Topic the barrier node reports its position on
    pub status_topic: String,
    pub tls: bool,
    pub keep_alive: Duration,
}

impl MqttSettings {
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            port: DEFAULT_MQTT_PORT,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            username: None,
            password: None,
            topic: DEFAULT_TOPIC.to_string(),
            status_topic: DEFAULT_TOPIC.to_string(),
            tls: true,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.broker, self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        if self.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

#[derive(Debug, Deserialize)]
struct StatusMessage {
    status: String,
}

fn status_word(state: BarrierState) -> &'static str {
    match state {
        BarrierState::Down => CLOSED_STATUS,
        BarrierState::Up => OPEN_STATUS,
    }
}

pub fn status_payload(command: BarrierCommand) -> Vec<u8> {
    serde_json::json!({ "status": status_word(command.target()) })
        .to_string()
        .into_bytes()
}

pub fn parse_status(payload: &[u8]) -> Option<BarrierState> {
    let message: StatusMessage = serde_json::from_slice(payload).ok()?;
    match message.status.as_str() {
        CLOSED_STATUS => Some(BarrierState::Down),
        OPEN_STATUS => Some(BarrierState::Up),
        _ => None,
    }
}

/// What a single event loop notification means for the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Refused,
    Acked(u16),
    Status(BarrierState),
    Ignored,
}

pub fn classify_event(event: &Event, status_topic: &str) -> LinkEvent {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
            LinkEvent::Connected
        }
        Event::Incoming(Packet::ConnAck(_)) => LinkEvent::Refused,
        Event::Incoming(Packet::PubAck(ack)) => LinkEvent::Acked(ack.pkid),
        Event::Incoming(Packet::Publish(publish)) if publish.topic == status_topic => {
            parse_status(&publish.payload).map_or(LinkEvent::Ignored, LinkEvent::Status)
        }
        _ => LinkEvent::Ignored,
    }
}

#[derive(Debug, Default)]
struct Link {
    connected: AtomicBool,
    stop: AtomicBool,
    expected_echo: Mutex<Option<BarrierState>>,
}

impl Link {
    fn expect_echo(&self, state: BarrierState) {
        let mut echo = self.expected_echo.lock().unwrap_or_else(|p| p.into_inner());
        *echo = Some(state);
    }

    /// Consume the pending echo of our own publish, if `state` is it.
    fn take_echo(&self, state: BarrierState) -> bool {
        let mut echo = self.expected_echo.lock().unwrap_or_else(|p| p.into_inner());
        if *echo == Some(state) {
            *echo = None;
            true
        } else {
            false
        }
    }
}

/// Publishes barrier commands over MQTT and waits for the broker's PUBACK.
pub struct MqttActuator {
    client: Client,
    topic: String,
    link: Arc<Link>,
    acks: Mutex<Receiver<u16>>,
}

impl MqttActuator {
    /// Start the connection thread. Position reports from the barrier node
    /// arrive on the returned receiver.
    pub fn connect(settings: MqttSettings) -> (Self, Receiver<BarrierState>) {
        let (client, connection) = Client::new(settings.options(), REQUEST_CAPACITY);
        let (ack_tx, ack_rx) = mpsc::channel();
        let (status_tx, status_rx) = mpsc::channel();
        let link = Arc::new(Link::default());

        info!(
            broker = %settings.broker,
            port = settings.port,
            topic = %settings.topic,
            tls = settings.tls,
            "Connecting to MQTT broker"
        );
        {
            let client = client.clone();
            let link = Arc::clone(&link);
            let status_topic = settings.status_topic.clone();
            std::thread::spawn(move || {
                drive_connection(connection, client, &status_topic, &link, ack_tx, status_tx)
            });
        }

        let actuator = Self {
            client,
            topic: settings.topic,
            link,
            acks: Mutex::new(ack_rx),
        };
        (actuator, status_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }
}

impl ActuatorTransport for MqttActuator {
    fn send(&self, command: BarrierCommand, timeout: Duration) -> SendOutcome {
        if !self.is_connected() {
            return SendOutcome::Failure("mqtt broker not connected".to_string());
        }
        let acks = self.acks.lock().unwrap_or_else(|p| p.into_inner());
        while acks.try_recv().is_ok() {}

        self.link.expect_echo(command.target());
        if let Err(err) = self
            .client
            .publish(&self.topic, QoS::AtLeastOnce, false, status_payload(command))
        {
            return SendOutcome::Failure(format!("mqtt publish failed: {err}"));
        }

        match acks.recv_timeout(timeout) {
            Ok(pkid) => {
                debug!(topic = %self.topic, pkid, ?command, "Broker acknowledged command");
                SendOutcome::Success
            }
            Err(RecvTimeoutError::Timeout) => SendOutcome::Timeout,
            Err(RecvTimeoutError::Disconnected) => {
                SendOutcome::Failure("mqtt link stopped".to_string())
            }
        }
    }
}

impl Drop for MqttActuator {
    fn drop(&mut self) {
        self.link.stop.store(true, Ordering::SeqCst);
        let _ = self.client.try_disconnect();
    }
}

fn drive_connection(
    mut connection: Connection,
    client: Client,
    status_topic: &str,
    link: &Link,
    acks: Sender<u16>,
    statuses: Sender<BarrierState>,
) {
    for notification in connection.iter() {
        if link.stop.load(Ordering::SeqCst) {
            break;
        }
        let event = match notification {
            Ok(event) => event,
            Err(err) => {
                if link.connected.swap(false, Ordering::SeqCst) {
                    warn!(error = %err, "MQTT connection lost");
                } else {
                    debug!(error = %err, "MQTT broker unreachable");
                }
                std::thread::sleep(RECONNECT_BACKOFF);
                continue;
            }
        };

        match classify_event(&event, status_topic) {
            LinkEvent::Connected => {
                link.connected.store(true, Ordering::SeqCst);
                info!(status_topic, "Connected to MQTT broker");
                if let Err(err) = client.subscribe(status_topic, QoS::AtLeastOnce) {
                    warn!(error = %err, status_topic, "Failed to subscribe to barrier status");
                }
            }
            LinkEvent::Refused => warn!("MQTT broker refused the connection"),
            LinkEvent::Acked(pkid) => {
                let _ = acks.send(pkid);
            }
            LinkEvent::Status(state) if link.take_echo(state) => {
                debug!(%state, "Skipping echo of our own command");
            }
            LinkEvent::Status(state) => {
                info!(%state, "Barrier reported its position");
                if statuses.send(state).is_err() {
                    debug!("No status listener; report dropped");
                }
            }
            LinkEvent::Ignored => {}
        }
    }
    debug!("MQTT link stopped");
}

/// Feed position reports into [`BarrierController::reconcile`] until the
/// sending side goes away.
pub fn spawn_status_reconciler(
    statuses: Receiver<BarrierState>,
    controller: BarrierController,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for observed in statuses {
            let previous = controller.reconcile(observed);
            if previous != observed {
                info!(from = %previous, to = %observed, "Belief corrected from status report");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::mock::MockTransport;
    use crate::barrier::TransitionCause;
    use crate::barrier::controller::ControllerConfig;
    use crate::events::{BarrierEvent, RecordingSink};
    use rumqttc::{ConnAck, PubAck, Publish};

    #[test]
    fn close_and_open_use_device_status_words() {
        assert_eq!(
            status_payload(BarrierCommand::Close),
            br#"{"status":"Tertutup"}"#.to_vec()
        );
        assert_eq!(
            status_payload(BarrierCommand::Open),
            br#"{"status":"Terbuka"}"#.to_vec()
        );
    }

    #[test]
    fn status_reports_map_to_barrier_states() {
        assert_eq!(parse_status(br#"{"status":"Tertutup"}"#), Some(BarrierState::Down));
        assert_eq!(parse_status(br#"{"status":"Terbuka"}"#), Some(BarrierState::Up));
        assert_eq!(parse_status(br#"{"status":"Bergerak"}"#), None);
        assert_eq!(parse_status(b"not json"), None);
    }

    #[test]
    fn connack_success_marks_link_connected() {
        let accepted = Event::Incoming(Packet::ConnAck(ConnAck::new(ConnectReturnCode::Success, false)));
        let refused = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::NotAuthorized,
            false,
        )));

        assert_eq!(classify_event(&accepted, DEFAULT_TOPIC), LinkEvent::Connected);
        assert_eq!(classify_event(&refused, DEFAULT_TOPIC), LinkEvent::Refused);
    }

    #[test]
    fn puback_is_an_acknowledgement() {
        let event = Event::Incoming(Packet::PubAck(PubAck::new(7)));
        assert_eq!(classify_event(&event, DEFAULT_TOPIC), LinkEvent::Acked(7));
    }

    #[test]
    fn status_only_counts_on_the_status_topic() {
        let report = Event::Incoming(Packet::Publish(Publish::new(
            DEFAULT_TOPIC,
            QoS::AtLeastOnce,
            br#"{"status":"Tertutup"}"#.to_vec(),
        )));
        let elsewhere = Event::Incoming(Packet::Publish(Publish::new(
            "smarttrain/other",
            QoS::AtLeastOnce,
            br#"{"status":"Tertutup"}"#.to_vec(),
        )));

        assert_eq!(
            classify_event(&report, DEFAULT_TOPIC),
            LinkEvent::Status(BarrierState::Down)
        );
        assert_eq!(classify_event(&elsewhere, DEFAULT_TOPIC), LinkEvent::Ignored);
    }

    #[test]
    fn own_echo_is_consumed_once() {
        let link = Link::default();
        link.expect_echo(BarrierState::Down);

        assert!(!link.take_echo(BarrierState::Up));
        assert!(link.take_echo(BarrierState::Down));
        assert!(!link.take_echo(BarrierState::Down));
    }

    #[test]
    fn send_without_broker_is_failure() {
        let mut settings = MqttSettings::new("127.0.0.1");
        settings.port = 9;
        settings.tls = false;
        let (actuator, _statuses) = MqttActuator::connect(settings);

        let outcome = actuator.send(BarrierCommand::Close, Duration::from_millis(100));

        assert!(matches!(outcome, SendOutcome::Failure(ref reason) if reason.contains("not connected")));
    }

    #[test]
    fn status_reports_reconcile_the_controller() {
        let sink = Arc::new(RecordingSink::new());
        let controller = BarrierController::new(
            ControllerConfig::default(),
            Arc::new(MockTransport::always_succeeds()),
            sink.clone(),
        );
        let (tx, rx) = mpsc::channel();
        let worker = spawn_status_reconciler(rx, controller.clone());

        tx.send(BarrierState::Down).expect("reconciler alive");
        tx.send(BarrierState::Down).expect("reconciler alive");
        drop(tx);
        worker.join().expect("reconciler thread panicked");

        assert_eq!(controller.state(), BarrierState::Down);
        assert_eq!(
            sink.transitions(),
            vec![BarrierEvent::StateChanged {
                from: BarrierState::Up,
                to: BarrierState::Down,
                cause: TransitionCause::Reconciled,
            }]
        );
    }
}
