use crate::api::ApiContext;
use crate::api::responses::{
    ApiErrorCode, ApiErrorResponse, ControlAcceptedResponse, ControlRequest,
    DetectionToggleResponse, HealthStatus, HealthSuccessResponse, LastSampleResponse,
    PipelineCounters, ReconcileRequest, ReconcileResponse, StatusSuccessResponse,
};
use crate::error::AppError;
use crate::events::BarrierEvent;
use crate::state::{CycleFailure, PipelineStats};
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::fmt;
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Debug)]
enum TimestampError {
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

/// JSON body on success, [`ApiErrorResponse`] otherwise.
pub enum ApiResponse<T> {
    Success { status: StatusCode, body: T },
    Error {
        status: StatusCode,
        body: ApiErrorResponse,
    },
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success { status, body } => (status, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_status(State(ctx): State<ApiContext>) -> impl IntoResponse {
    build_status_response(&ctx, SystemTime::now())
}

pub async fn get_health(State(ctx): State<ApiContext>) -> impl IntoResponse {
    build_health_response(&ctx, SystemTime::now())
}

pub async fn post_control(
    State(ctx): State<ApiContext>,
    Json(request): Json<ControlRequest>,
) -> impl IntoResponse {
    build_control_response(&ctx, request, SystemTime::now())
}

pub async fn post_reconcile(
    State(ctx): State<ApiContext>,
    Json(request): Json<ReconcileRequest>,
) -> impl IntoResponse {
    build_reconcile_response(&ctx, request, SystemTime::now())
}

pub async fn post_detection_start(State(ctx): State<ApiContext>) -> impl IntoResponse {
    let changed = ctx.detection.start();
    build_toggle_response(&ctx, changed, SystemTime::now())
}

pub async fn post_detection_stop(State(ctx): State<ApiContext>) -> impl IntoResponse {
    let changed = ctx.detection.pause();
    build_toggle_response(&ctx, changed, SystemTime::now())
}

/// GET /api/events: barrier events as server-sent events.
pub async fn get_events(
    State(ctx): State<ApiContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(
        subscribers = ctx.events.subscriber_count() + 1,
        "SSE client connected"
    );
    let stream = BroadcastStream::new(ctx.events.subscribe()).filter_map(|result| async move {
        match result {
            Ok(event) => to_sse_event(&event).map(Ok),
            Err(err) => {
                warn!(error = %err, "SSE subscriber fell behind");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text("keep-alive"))
}

fn to_sse_event(event: &BarrierEvent) -> Option<Event> {
    match Event::default().event(event.name()).json_data(event) {
        Ok(sse) => Some(sse),
        Err(err) => {
            warn!(error = %err, kind = event.name(), "Failed to serialize barrier event");
            None
        }
    }
}

fn build_status_response(ctx: &ApiContext, now: SystemTime) -> ApiResponse<StatusSuccessResponse> {
    let guard = match ctx.state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return internal_error("/api/status", "state lock poisoned while reading pipeline");
        }
    };
    let pipeline = guard.pipeline().clone();
    drop(guard);

    let snapshot = ctx.controller.snapshot();
    let last_sample = match pipeline.last_sample {
        Some(sample) => match format_timestamp(sample.timestamp) {
            Ok(timestamp) => Some(LastSampleResponse {
                vehicle_present: sample.vehicle_present,
                confidence: sample.confidence,
                timestamp,
            }),
            Err(_) => return internal_error("/api/status", "timestamp formatting failure"),
        },
        None => None,
    };

    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/status", "timestamp formatting failure"),
    };

    ApiResponse::Success {
        status: StatusCode::OK,
        body: StatusSuccessResponse {
            barrier_state: snapshot.state,
            pending_command: snapshot.pending,
            detection_running: ctx.detection.is_running(),
            history_len: snapshot.history_len,
            controller: snapshot.stats,
            pipeline: PipelineCounters {
                frames_processed: pipeline.frames_processed,
                capture_failures: pipeline.capture_failures,
                classifier_failures: pipeline.classifier_failures,
            },
            last_sample,
            timestamp,
        },
    }
}

fn build_health_response(ctx: &ApiContext, now: SystemTime) -> ApiResponse<HealthSuccessResponse> {
    let pipeline = ctx.pipeline.borrow().clone();
    let (status, last_error) = derive_health_status(&pipeline);

    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/health", "timestamp formatting failure"),
    };

    let status_code = match status {
        HealthStatus::Ko => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
    };

    ApiResponse::Success {
        status: status_code,
        body: HealthSuccessResponse {
            status,
            last_error,
            timestamp,
        },
    }
}

/// Ok until a frame fails; degraded while the latest cycle failed after earlier
/// successes; ko when no frame has ever made it through.
fn derive_health_status(pipeline: &PipelineStats) -> (HealthStatus, Option<String>) {
    let Some((failure, failed_at)) = pipeline.last_failure.as_ref() else {
        return (HealthStatus::Ok, None);
    };
    let reason = match failure {
        CycleFailure::Capture { reason } => format!("capture: {reason}"),
        CycleFailure::Classifier { reason } => format!("classifier: {reason}"),
    };

    match pipeline.last_sample.as_ref() {
        None => (HealthStatus::Ko, Some(reason)),
        Some(sample) if sample.timestamp >= *failed_at => (HealthStatus::Ok, None),
        Some(_) => (HealthStatus::Degraded, Some(reason)),
    }
}

fn build_control_response(
    ctx: &ApiContext,
    request: ControlRequest,
    now: SystemTime,
) -> ApiResponse<ControlAcceptedResponse> {
    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/control", "timestamp formatting failure"),
    };

    match ctx.controller.command(request.command) {
        // The worker reports its own outcome through the event sink.
        Ok(handle) => {
            info!(command = ?handle.command(), "Manual command accepted");
            ApiResponse::Success {
                status: StatusCode::ACCEPTED,
                body: ControlAcceptedResponse {
                    command: request.command,
                    barrier_state: ctx.controller.state(),
                    timestamp,
                },
            }
        }
        Err(err @ AppError::CommandInFlight(_)) => {
            warn!(requested = ?request.command, error = %err, "Manual command refused");
            ApiResponse::Error {
                status: StatusCode::CONFLICT,
                body: ApiErrorResponse {
                    error_code: ApiErrorCode::CommandInFlight,
                    error_message: err.to_string(),
                    timestamp,
                },
            }
        }
        Err(err) => {
            error!(error = %err, "Manual command could not start");
            internal_error("/api/control", "manual command could not start")
        }
    }
}

fn build_reconcile_response(
    ctx: &ApiContext,
    request: ReconcileRequest,
    now: SystemTime,
) -> ApiResponse<ReconcileResponse> {
    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/barrier/reconcile", "timestamp formatting failure"),
    };

    let previous_state = ctx.controller.reconcile(request.state);
    ApiResponse::Success {
        status: StatusCode::OK,
        body: ReconcileResponse {
            previous_state,
            barrier_state: request.state,
            changed: previous_state != request.state,
            timestamp,
        },
    }
}

fn build_toggle_response(
    ctx: &ApiContext,
    changed: bool,
    now: SystemTime,
) -> ApiResponse<DetectionToggleResponse> {
    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::OK,
            body: DetectionToggleResponse {
                detection_running: ctx.detection.is_running(),
                changed,
                timestamp,
            },
        },
        Err(_) => internal_error("/api/detection", "timestamp formatting failure"),
    }
}

fn internal_error<T>(route: &str, message: &str) -> ApiResponse<T> {
    error!(route, reason = message, "Internal error while handling request");
    let formatted = format_timestamp(SystemTime::now()).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format internal error timestamp");
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
    });
    ApiResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ApiErrorResponse {
            error_code: ApiErrorCode::InternalError,
            error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            timestamp: formatted,
        },
    }
}

fn format_timestamp(timestamp: SystemTime) -> Result<String, TimestampError> {
    let datetime = OffsetDateTime::from(timestamp);
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::mock::{MockSendBehavior, MockTransport};
    use crate::barrier::controller::ControllerConfig;
    use crate::barrier::policy::RetryPolicy;
    use crate::barrier::{BarrierCommand, BarrierController, BarrierState};
    use crate::events::BroadcastSink;
    use crate::pipeline::DetectionLoop;
    use crate::state::{AppState, SampleRecord};
    use std::sync::{Arc, RwLock};
    use std::time::UNIX_EPOCH;

    fn context_with(transport: MockTransport) -> ApiContext {
        let events = BroadcastSink::new(16);
        let config = ControllerConfig {
            retry: RetryPolicy {
                max_attempts: 1,
                attempt_timeout: Duration::from_millis(50),
                failure_backoff: Duration::from_millis(1),
                timeout_backoff: Duration::from_millis(1),
                ..RetryPolicy::default()
            },
            ..ControllerConfig::default()
        };
        let controller =
            BarrierController::new(config, Arc::new(transport), Arc::new(events.clone()));
        ApiContext::new(
            controller,
            DetectionLoop::new(false),
            events,
            Arc::new(RwLock::new(AppState::new())),
        )
    }

    fn context() -> ApiContext {
        context_with(MockTransport::always_succeeds())
    }

    fn record(ctx: &ApiContext, at_secs: u64) {
        let mut guard = ctx.state.write().expect("state lock");
        guard
            .record_sample(SampleRecord {
                vehicle_present: true,
                confidence: 0.8,
                timestamp: UNIX_EPOCH + Duration::from_secs(at_secs),
            })
            .expect("record sample");
    }

    fn fail(ctx: &ApiContext, at_secs: u64) {
        let mut guard = ctx.state.write().expect("state lock");
        guard
            .record_failure(
                CycleFailure::Capture {
                    reason: "timeout".to_string(),
                },
                UNIX_EPOCH + Duration::from_secs(at_secs),
            )
            .expect("record failure");
    }

    #[test]
    fn status_reports_controller_and_pipeline() {
        let ctx = context();
        record(&ctx, 1);

        let response = build_status_response(&ctx, UNIX_EPOCH + Duration::from_secs(2));

        match response {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body.barrier_state, BarrierState::Up);
                assert_eq!(body.pending_command, None);
                assert!(!body.detection_running);
                assert_eq!(body.pipeline.frames_processed, 1);
                let sample = body.last_sample.expect("last sample");
                assert_eq!(sample.timestamp, "1970-01-01T00:00:01Z");
                assert_eq!(body.timestamp, "1970-01-01T00:00:02Z");
            }
            ApiResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }

    #[test]
    fn status_returns_internal_error_when_lock_poisoned() {
        let ctx = context();
        let state_for_thread = Arc::clone(&ctx.state);
        let _ = std::thread::spawn(move || {
            let _guard = state_for_thread.write().expect("lock for poison");
            panic!("poison lock");
        })
        .join();

        let response = build_status_response(&ctx, SystemTime::now());

        match response {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body.error_code, ApiErrorCode::InternalError);
                assert_eq!(body.error_message, "Internal server error");
            }
            ApiResponse::Success { .. } => panic!("expected internal error response"),
        }
    }

    #[test]
    fn health_is_ok_without_failures() {
        let ctx = context();

        match build_health_response(&ctx, UNIX_EPOCH) {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body.status, HealthStatus::Ok);
                assert_eq!(body.last_error, None);
            }
            ApiResponse::Error { status, .. } => panic!("unexpected error: {status}"),
        }
    }

    #[test]
    fn health_is_ko_when_no_frame_ever_succeeded() {
        let ctx = context();
        fail(&ctx, 1);

        match build_health_response(&ctx, UNIX_EPOCH) {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body.status, HealthStatus::Ko);
                assert_eq!(body.last_error.as_deref(), Some("capture: timeout"));
            }
            ApiResponse::Error { status, .. } => panic!("unexpected error: {status}"),
        }
    }

    #[test]
    fn health_is_degraded_after_failure_following_success() {
        let ctx = context();
        record(&ctx, 1);
        fail(&ctx, 2);

        match build_health_response(&ctx, UNIX_EPOCH) {
            ApiResponse::Success { body, .. } => assert_eq!(body.status, HealthStatus::Degraded),
            ApiResponse::Error { status, .. } => panic!("unexpected error: {status}"),
        }

        record(&ctx, 3);
        match build_health_response(&ctx, UNIX_EPOCH) {
            ApiResponse::Success { body, .. } => assert_eq!(body.status, HealthStatus::Ok),
            ApiResponse::Error { status, .. } => panic!("unexpected error: {status}"),
        }
    }

    #[test]
    fn control_is_accepted_then_conflicts_while_in_flight() {
        let ctx = context_with(
            MockTransport::new(vec![MockSendBehavior::Succeed])
                .with_latency(Duration::from_millis(200)),
        );

        let first = build_control_response(
            &ctx,
            ControlRequest {
                command: BarrierCommand::Close,
            },
            UNIX_EPOCH,
        );
        match first {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::ACCEPTED);
                assert_eq!(body.command, BarrierCommand::Close);
            }
            ApiResponse::Error { status, .. } => panic!("unexpected error: {status}"),
        }

        let second = build_control_response(
            &ctx,
            ControlRequest {
                command: BarrierCommand::Open,
            },
            UNIX_EPOCH,
        );
        match second {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::CONFLICT);
                assert_eq!(body.error_code, ApiErrorCode::CommandInFlight);
            }
            ApiResponse::Success { .. } => panic!("expected conflict"),
        }
    }

    #[test]
    fn reconcile_reports_previous_state() {
        let ctx = context();

        match build_reconcile_response(
            &ctx,
            ReconcileRequest {
                state: BarrierState::Down,
            },
            UNIX_EPOCH,
        ) {
            ApiResponse::Success { body, .. } => {
                assert_eq!(body.previous_state, BarrierState::Up);
                assert_eq!(body.barrier_state, BarrierState::Down);
                assert!(body.changed);
            }
            ApiResponse::Error { status, .. } => panic!("unexpected error: {status}"),
        }
        assert_eq!(ctx.controller.state(), BarrierState::Down);
    }

    #[test]
    fn toggle_reflects_detection_flag() {
        let ctx = context();
        let changed = ctx.detection.start();

        match build_toggle_response(&ctx, changed, UNIX_EPOCH) {
            ApiResponse::Success { body, .. } => {
                assert!(body.detection_running);
                assert!(body.changed);
            }
            ApiResponse::Error { status, .. } => panic!("unexpected error: {status}"),
        }
    }

    #[test]
    fn events_become_named_sse_frames() {
        let event = BarrierEvent::DegradedSuccess {
            direction: BarrierCommand::Close,
            attempts: 2,
        };
        assert!(to_sse_event(&event).is_some());
    }
}
