use crate::error::AppError;
use std::time::SystemTime;
use tokio::sync::watch;

/// Last classified frame, stamped with wall-clock time for the API.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub vehicle_present: bool,
    pub confidence: f64,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleFailure {
    Capture { reason: String },
    Classifier { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub capture_failures: u64,
    pub classifier_failures: u64,
    pub last_sample: Option<SampleRecord>,
    pub last_failure: Option<(CycleFailure, SystemTime)>,
}

#[derive(Debug)]
pub struct AppState {
    pipeline: PipelineStats,
    pipeline_tx: watch::Sender<PipelineStats>,
}

impl AppState {
    pub fn new() -> Self {
        let (pipeline_tx, _pipeline_rx) = watch::channel(PipelineStats::default());
        Self {
            pipeline: PipelineStats::default(),
            pipeline_tx,
        }
    }

    pub fn pipeline(&self) -> &PipelineStats {
        &self.pipeline
    }

    pub fn subscribe_pipeline(&self) -> watch::Receiver<PipelineStats> {
        self.pipeline_tx.subscribe()
    }

    pub fn record_sample(&mut self, sample: SampleRecord) -> Result<(), AppError> {
        self.pipeline.frames_processed += 1;
        self.pipeline.last_sample = Some(sample);
        self.publish()
    }

    pub fn record_failure(
        &mut self,
        failure: CycleFailure,
        timestamp: SystemTime,
    ) -> Result<(), AppError> {
        match failure {
            CycleFailure::Capture { .. } => self.pipeline.capture_failures += 1,
            CycleFailure::Classifier { .. } => self.pipeline.classifier_failures += 1,
        }
        self.pipeline.last_failure = Some((failure, timestamp));
        self.publish()
    }

    fn publish(&self) -> Result<(), AppError> {
        self.pipeline_tx
            .send(self.pipeline.clone())
            .map_err(|_| AppError::WatchSend)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
