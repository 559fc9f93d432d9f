use crossing_guard::actuator::http::HttpActuator;
use crossing_guard::actuator::mqtt::{self, MqttActuator};
use crossing_guard::actuator::{ActuatorKind, ActuatorTransport};
use crossing_guard::api::{self, ApiContext};
use crossing_guard::barrier::{BarrierController, BarrierState};
use crossing_guard::config::{self, Config};
use crossing_guard::detection::capture::HttpFrameSource;
use crossing_guard::detection::remote::RemoteClassifier;
use crossing_guard::events::BroadcastSink;
use crossing_guard::pipeline::{self, DetectionLoop};
use crossing_guard::state::AppState;
use std::net::SocketAddr;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, RwLock};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Blocking I/O adapters; built off the async runtime.
struct Adapters {
    transport: Arc<dyn ActuatorTransport>,
    statuses: Option<Receiver<BarrierState>>,
    source: HttpFrameSource,
    classifier: RemoteClassifier,
    camera_online: bool,
}

fn init_tracing(level: tracing::Level) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

fn build_adapters(config: &Config) -> Result<Adapters, BoxError> {
    let (transport, statuses): (Arc<dyn ActuatorTransport>, Option<Receiver<BarrierState>>) =
        match config.actuator_kind() {
            ActuatorKind::Http => {
                let actuator = HttpActuator::new(config.actuator_url().to_string())?;
                tracing::info!(endpoint = actuator.endpoint(), "Barrier actuator configured (http)");
                let transport: Arc<dyn ActuatorTransport> = Arc::new(actuator);
                (transport, None)
            }
            ActuatorKind::Mqtt => {
                let settings = config
                    .mqtt_settings()
                    .ok_or("actuator transport is mqtt but [mqtt].broker is not set")?;
                let (actuator, statuses) = MqttActuator::connect(settings);
                let transport: Arc<dyn ActuatorTransport> = Arc::new(actuator);
                (transport, Some(statuses))
            }
        };

    let mut source = HttpFrameSource::new(
        config.camera_url().to_string(),
        config.camera_timeout(),
        config.camera_max_frame_bytes(),
    )?;
    let camera_online = source.check_online();
    let classifier = RemoteClassifier::new(
        config.classifier_url().to_string(),
        config.classifier_timeout(),
        config.classifier_max_response_bytes(),
    )?;

    Ok(Adapters {
        transport,
        statuses,
        source,
        classifier,
        camera_online,
    })
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = config::load_default()?;
    init_tracing(config.log_level());
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        app = %config.app.name,
        "crossing-guard starting"
    );

    let adapter_config = config.clone();
    let Adapters {
        transport,
        statuses,
        source,
        classifier,
        camera_online,
    } = tokio::task::spawn_blocking(move || build_adapters(&adapter_config)).await??;

    let state = Arc::new(RwLock::new(AppState::new()));
    let events = BroadcastSink::default();

    let controller_config = config.controller_config();
    tracing::info!(
        initial_state = %controller_config.initial_state,
        close_streak = controller_config.debounce.close_streak,
        close_confidence = controller_config.debounce.close_confidence,
        open_streak = controller_config.debounce.open_streak,
        max_attempts = controller_config.retry.max_attempts,
        on_timeout = ?controller_config.retry.on_timeout,
        "Barrier controller configured"
    );
    let controller = BarrierController::new(controller_config, transport, Arc::new(events.clone()));

    // Lives as long as the MQTT link; not joined on shutdown.
    let _status_reconciler = statuses.map(|rx| mqtt::spawn_status_reconciler(rx, controller.clone()));

    if !camera_online {
        tracing::warn!("Detection not started; use POST /api/detection/start once the camera is up");
    }
    let detection = DetectionLoop::new(camera_online && config.autostart());
    let ctx = ApiContext::new(
        controller.clone(),
        detection.clone(),
        events.clone(),
        Arc::clone(&state),
    );

    let detection_handle = pipeline::spawn_detection_thread(
        source,
        classifier,
        config.class_filter(),
        controller,
        Arc::clone(&state),
        detection.clone(),
        config.frame_interval(),
    );

    let app = api::router(ctx);
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    detection.shutdown();
    if detection_handle.join().is_err() {
        tracing::warn!("Detection thread panicked");
    }
    tracing::info!("crossing-guard stopped");

    Ok(())
}
