use crate::actuator::{ActuatorTransport, SendOutcome};
use crate::barrier::BarrierCommand;
use crate::http::{HttpClient, HttpError};
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Controller acknowledgements are short status lines.
const MAX_ACK_BYTES: usize = 64 * 1024;

/// Posts barrier commands to the crossing controller's `/control` endpoint.
#[derive(Debug, Clone)]
pub struct HttpActuator {
    http: HttpClient,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct ControlPayload {
    command: &'static str,
    value: &'static str,
    timestamp: f64,
}

impl HttpActuator {
    pub fn new(endpoint: String) -> Result<Self, HttpError> {
        Ok(Self {
            http: HttpClient::new(MAX_ACK_BYTES)?,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ActuatorTransport for HttpActuator {
    fn send(&self, command: BarrierCommand, timeout: Duration) -> SendOutcome {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let payload = ControlPayload {
            command: "barrier",
            value: command.wire_value(),
            timestamp,
        };

        match self.http.post_json(&self.endpoint, &payload, timeout) {
            Ok(response) if response.is_success() => {
                debug!(endpoint = %self.endpoint, status = response.status, "Actuator acknowledged");
                SendOutcome::Success
            }
            Ok(response) => SendOutcome::Failure(format!(
                "http status {} ({})",
                response.status,
                response.body_text().trim()
            )),
            Err(err) if err.is_timeout() => SendOutcome::Timeout,
            Err(err) => SendOutcome::Failure(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_server::{serve_and_hold, serve_once, serve_trickle};
    use std::time::Instant;

    #[test]
    fn close_posts_down_payload() -> Result<(), Box<dyn std::error::Error>> {
        let (base, server) = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n", Duration::ZERO)?;
        let actuator = HttpActuator::new(format!("{base}/control"))?;

        let outcome = actuator.send(BarrierCommand::Close, Duration::from_secs(2));
        let request = server.join().map_err(|_| "server thread panicked")?;

        assert_eq!(outcome, SendOutcome::Success);
        assert!(request.starts_with("POST /control HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(request.contains(r#""command":"barrier""#));
        assert!(request.contains(r#""value":"down""#));
        Ok(())
    }

    #[test]
    fn error_status_is_failure() -> Result<(), Box<dyn std::error::Error>> {
        let (base, server) = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\n\r\nservo busy",
            Duration::ZERO,
        )?;
        let actuator = HttpActuator::new(format!("{base}/control"))?;

        let outcome = actuator.send(BarrierCommand::Open, Duration::from_secs(2));
        let _ = server.join();

        match outcome {
            SendOutcome::Failure(reason) => {
                assert!(reason.contains("503"));
                assert!(reason.contains("servo busy"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn slow_controller_is_timeout() -> Result<(), Box<dyn std::error::Error>> {
        let (base, server) = serve_once("HTTP/1.1 200 OK\r\n\r\n", Duration::from_millis(400))?;
        let actuator = HttpActuator::new(format!("{base}/control"))?;

        let outcome = actuator.send(BarrierCommand::Close, Duration::from_millis(100));
        let _ = server.join();

        assert_eq!(outcome, SendOutcome::Timeout);
        Ok(())
    }

    #[test]
    fn trickling_controller_times_out_within_the_attempt_budget() -> Result<(), Box<dyn std::error::Error>> {
        let (base, _server) = serve_trickle(
            "HTTP/1.1 200 OK\r\nContent-Length: 16\r\n\r\nservo moving....",
            Duration::from_millis(60),
        )?;
        let actuator = HttpActuator::new(format!("{base}/control"))?;
        let started = Instant::now();

        let outcome = actuator.send(BarrierCommand::Close, Duration::from_millis(150));

        assert_eq!(outcome, SendOutcome::Timeout);
        assert!(started.elapsed() < Duration::from_millis(800));
        Ok(())
    }

    #[test]
    fn acknowledgement_on_kept_alive_socket_is_success() -> Result<(), Box<dyn std::error::Error>> {
        let (base, _server) = serve_and_hold(
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK",
            Duration::from_secs(2),
        )?;
        let actuator = HttpActuator::new(format!("{base}/control"))?;

        let outcome = actuator.send(BarrierCommand::Open, Duration::from_millis(500));

        assert_eq!(outcome, SendOutcome::Success);
        Ok(())
    }

    #[test]
    fn refused_connection_is_failure() -> Result<(), HttpError> {
        let actuator = HttpActuator::new("http://127.0.0.1:9/control".to_string())?;
        let outcome = actuator.send(BarrierCommand::Close, Duration::from_millis(200));
        assert!(matches!(outcome, SendOutcome::Failure(_)));
        Ok(())
    }
}
