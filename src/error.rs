use crate::barrier::BarrierCommand;
use crate::http::HttpError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("capture error: {0}")]
    Capture(String),
    #[error("classifier error: {0}")]
    Classifier(String),
    #[error("http error: {0}")]
    Http(#[from] HttpError),
    #[error("{0:?} command already in flight")]
    CommandInFlight(BarrierCommand),
    #[error("command worker panicked")]
    WorkerPanicked,
    #[error("watch channel send failed")]
    WatchSend,
    #[error("state lock poisoned")]
    StateLock,
}
