//! Periodic capture -> classify -> observe loop.

use crate::barrier::{BarrierController, ObserveOutcome};
use crate::detection::{ClassFilter, DetectionSample, FrameSource, VehicleClassifier};
use crate::error::AppError;
use crate::state::{AppState, CycleFailure, SampleRecord};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Run one frame through the pipeline and hand the result to the controller.
///
/// Capture and classifier failures are recorded in `state` and returned; they
/// never reach the controller.
pub fn run_detection_cycle<S, C>(
    source: &mut S,
    classifier: &mut C,
    filter: &ClassFilter,
    controller: &BarrierController,
    state: &Arc<RwLock<AppState>>,
) -> Result<(DetectionSample, ObserveOutcome), AppError>
where
    S: FrameSource,
    C: VehicleClassifier,
{
    let frame = match source.capture() {
        Ok(frame) => frame,
        Err(err) => {
            record_failure(
                state,
                CycleFailure::Capture {
                    reason: err.to_string(),
                },
            )?;
            return Err(err);
        }
    };

    let detections = match classifier.detect(&frame) {
        Ok(detections) => detections,
        Err(err) => {
            record_failure(
                state,
                CycleFailure::Classifier {
                    reason: err.to_string(),
                },
            )?;
            return Err(err);
        }
    };

    let sample = filter.sample(&detections, frame.captured_at);
    debug!(
        detections = detections.len(),
        vehicle_present = sample.vehicle_present,
        confidence = sample.confidence,
        "Frame classified"
    );
    let outcome = controller.observe(sample);

    let mut guard = state.write().map_err(|_| AppError::StateLock)?;
    if let Err(err) = guard.record_sample(SampleRecord {
        vehicle_present: sample.vehicle_present,
        confidence: sample.confidence,
        timestamp: SystemTime::now(),
    }) {
        debug!(error = %err, "No pipeline subscribers");
    }

    Ok((sample, outcome))
}

fn record_failure(state: &Arc<RwLock<AppState>>, failure: CycleFailure) -> Result<(), AppError> {
    let mut guard = state.write().map_err(|_| AppError::StateLock)?;
    if let Err(err) = guard.record_failure(failure, SystemTime::now()) {
        debug!(error = %err, "No pipeline subscribers");
    }
    Ok(())
}

/// Runtime switches for the detection thread.
#[derive(Debug, Clone)]
pub struct DetectionLoop {
    enabled: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl DetectionLoop {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns false when the loop was already running.
    pub fn start(&self) -> bool {
        let was_running = self.enabled.swap(true, Ordering::Relaxed);
        if !was_running {
            info!("Detection started");
        }
        !was_running
    }

    /// Returns false when the loop was already paused.
    pub fn pause(&self) -> bool {
        let was_running = self.enabled.swap(false, Ordering::Relaxed);
        if was_running {
            info!("Detection stopped");
        }
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

/// Spawn the detection thread. Frames are processed one at a time, so a slow
/// classifier or controller drops frames instead of queueing them.
pub fn spawn_detection_thread<S, C>(
    mut source: S,
    mut classifier: C,
    filter: ClassFilter,
    controller: BarrierController,
    state: Arc<RwLock<AppState>>,
    control: DetectionLoop,
    interval: Duration,
) -> std::thread::JoinHandle<()>
where
    S: FrameSource + Send + 'static,
    C: VehicleClassifier + Send + 'static,
{
    std::thread::spawn(move || {
        info!(
            interval_ms = interval.as_millis(),
            running = control.is_running(),
            "Detection thread started"
        );
        while !control.is_shutdown() {
            let cycle_start = Instant::now();

            if control.is_running() {
                match run_detection_cycle(&mut source, &mut classifier, &filter, &controller, &state)
                {
                    Ok((_, ObserveOutcome::Dispatched(handle))) => {
                        debug!(command = ?handle.command(), "Command dispatched from detection loop");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "Detection cycle failed"),
                }
            }

            sleep_with_stop(interval, &control.stop, cycle_start);
        }
        info!("Detection thread stopped");
    })
}

fn sleep_with_stop(duration: Duration, stop: &AtomicBool, start: Instant) {
    let elapsed = start.elapsed();
    if elapsed >= duration {
        return;
    }
    let remaining = duration - elapsed;
    let step = Duration::from_millis(20).min(remaining);
    let mut slept = Duration::ZERO;

    while slept < remaining {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        std::thread::sleep(step);
        slept += step;
    }
}
