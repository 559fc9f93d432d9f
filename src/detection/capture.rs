use crate::detection::{Frame, FrameSource};
use crate::error::AppError;
use crate::http::{HttpClient, HttpError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_FRAME_BYTES: usize = 5 * 1024 * 1024;

/// Pulls single JPEG frames from the camera's capture endpoint.
#[derive(Debug, Clone)]
pub struct HttpFrameSource {
    http: HttpClient,
    capture_url: String,
    timeout: Duration,
}

impl HttpFrameSource {
    pub fn new(capture_url: String, timeout: Duration, max_frame_bytes: usize) -> Result<Self, HttpError> {
        Ok(Self {
            http: HttpClient::new(max_frame_bytes)?,
            capture_url,
            timeout,
        })
    }

    pub fn capture_url(&self) -> &str {
        &self.capture_url
    }

    /// Check that the camera answers with a frame.
    pub fn check_online(&mut self) -> bool {
        match self.capture() {
            Ok(frame) => {
                info!(
                    url = %self.capture_url,
                    bytes = frame.bytes.len(),
                    "Camera reachable"
                );
                true
            }
            Err(err) => {
                warn!(url = %self.capture_url, error = %err, "Camera not reachable");
                false
            }
        }
    }
}

impl FrameSource for HttpFrameSource {
    fn capture(&mut self) -> Result<Frame, AppError> {
        let response = self.http.get(&self.capture_url, self.timeout)?;
        if !response.is_success() {
            return Err(AppError::Capture(format!(
                "camera responded with status {}",
                response.status
            )));
        }
        if response.body.is_empty() {
            return Err(AppError::Capture("camera returned an empty frame".to_string()));
        }
        Ok(Frame {
            bytes: response.body,
            captured_at: Instant::now(),
        })
    }
}
