use crate::barrier::BarrierController;
use crate::events::BroadcastSink;
use crate::pipeline::DetectionLoop;
use crate::state::{AppState, PipelineStats};
use axum::Router;
use axum::routing::{get, post};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

pub mod handlers;
pub mod responses;

/// Everything the HTTP handlers reach into.
#[derive(Clone)]
pub struct ApiContext {
    pub controller: BarrierController,
    pub detection: DetectionLoop,
    pub events: BroadcastSink,
    pub state: Arc<RwLock<AppState>>,
    pub pipeline: watch::Receiver<PipelineStats>,
}

impl ApiContext {
    pub fn new(
        controller: BarrierController,
        detection: DetectionLoop,
        events: BroadcastSink,
        state: Arc<RwLock<AppState>>,
    ) -> Self {
        let pipeline = match state.read() {
            Ok(guard) => guard.subscribe_pipeline(),
            Err(poisoned) => poisoned.into_inner().subscribe_pipeline(),
        };
        Self {
            controller,
            detection,
            events,
            state,
            pipeline,
        }
    }
}

pub fn router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/health", get(handlers::get_health))
        .route("/api/control", post(handlers::post_control))
        .route("/api/barrier/reconcile", post(handlers::post_reconcile))
        .route("/api/detection/start", post(handlers::post_detection_start))
        .route("/api/detection/stop", post(handlers::post_detection_stop))
        .route("/api/events", get(handlers::get_events))
        .with_state(ctx)
}
