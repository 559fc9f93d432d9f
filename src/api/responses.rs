use crate::barrier::controller::ControllerStats;
use crate::barrier::{BarrierCommand, BarrierState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StatusSuccessResponse {
    pub barrier_state: BarrierState,
    pub pending_command: Option<BarrierCommand>,
    pub detection_running: bool,
    pub history_len: usize,
    pub controller: ControllerStats,
    pub pipeline: PipelineCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sample: Option<LastSampleResponse>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PipelineCounters {
    pub frames_processed: u64,
    pub capture_failures: u64,
    pub classifier_failures: u64,
}

#[derive(Debug, Serialize)]
pub struct LastSampleResponse {
    pub vehicle_present: bool,
    pub confidence: f64,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Ko,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub command: BarrierCommand,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ControlAcceptedResponse {
    pub command: BarrierCommand,
    pub barrier_state: BarrierState,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub state: BarrierState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ReconcileResponse {
    pub previous_state: BarrierState,
    pub barrier_state: BarrierState,
    pub changed: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DetectionToggleResponse {
    pub detection_running: bool,
    pub changed: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ApiErrorResponse {
    pub error_code: ApiErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    CommandInFlight,
    InternalError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_response_omits_last_sample_when_none() -> Result<(), serde_json::Error> {
        let response = StatusSuccessResponse {
            barrier_state: BarrierState::Down,
            pending_command: Some(BarrierCommand::Open),
            detection_running: true,
            history_len: 4,
            controller: ControllerStats::default(),
            pipeline: PipelineCounters {
                frames_processed: 4,
                capture_failures: 0,
                classifier_failures: 1,
            },
            last_sample: None,
            timestamp: "2026-01-11T12:30:00Z".to_string(),
        };

        let value = serde_json::to_value(response)?;
        assert_eq!(value["barrier_state"], json!("DOWN"));
        assert_eq!(value["pending_command"], json!("open"));
        assert_eq!(value["pipeline"]["classifier_failures"], json!(1));
        assert_eq!(value["controller"]["commands_issued"], json!(0));
        assert!(value.get("last_sample").is_none());
        Ok(())
    }

    #[test]
    fn control_request_accepts_lowercase_commands() -> Result<(), serde_json::Error> {
        let request: ControlRequest = serde_json::from_str(r#"{"command":"close"}"#)?;
        assert_eq!(request.command, BarrierCommand::Close);

        let invalid = serde_json::from_str::<ControlRequest>(r#"{"command":"lift"}"#);
        assert!(invalid.is_err());
        Ok(())
    }

    #[test]
    fn reconcile_request_accepts_uppercase_state() -> Result<(), serde_json::Error> {
        let request: ReconcileRequest = serde_json::from_str(r#"{"state":"DOWN"}"#)?;
        assert_eq!(request.state, BarrierState::Down);
        Ok(())
    }

    #[test]
    fn error_response_uses_screaming_snake_case_code() -> Result<(), serde_json::Error> {
        let response = ApiErrorResponse {
            error_code: ApiErrorCode::CommandInFlight,
            error_message: "Close command already in flight".to_string(),
            timestamp: "2026-01-11T12:32:00Z".to_string(),
        };

        assert_eq!(
            serde_json::to_value(response)?,
            json!({
                "error_code": "COMMAND_IN_FLIGHT",
                "error_message": "Close command already in flight",
                "timestamp": "2026-01-11T12:32:00Z"
            })
        );
        Ok(())
    }

    #[test]
    fn health_response_serializes_status() -> Result<(), serde_json::Error> {
        let response = HealthSuccessResponse {
            status: HealthStatus::Degraded,
            last_error: Some("capture error: timeout".to_string()),
            timestamp: "2026-01-11T12:33:00Z".to_string(),
        };

        assert_eq!(
            serde_json::to_value(response)?,
            json!({
                "status": "degraded",
                "last_error": "capture error: timeout",
                "timestamp": "2026-01-11T12:33:00Z"
            })
        );
        Ok(())
    }
}
