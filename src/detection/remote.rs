use crate::detection::{Detection, Frame, VehicleClassifier};
use crate::error::AppError;
use crate::http::{HttpClient, HttpError};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Sends frames to an object-detection service and parses its detections.
///
/// The service receives the raw JPEG as `image/jpeg` and answers with
/// `{"detections": [{"class": "bus", "confidence": 0.87, "bbox": {...}}]}`.
#[derive(Debug, Clone)]
pub struct RemoteClassifier {
    http: HttpClient,
    endpoint: String,
    timeout: Duration,
}

impl RemoteClassifier {
    pub fn new(endpoint: String, timeout: Duration, max_response_bytes: usize) -> Result<Self, HttpError> {
        Ok(Self {
            http: HttpClient::new(max_response_bytes)?,
            endpoint,
            timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

impl VehicleClassifier for RemoteClassifier {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, AppError> {
        let response = self
            .http
            .post(&self.endpoint, "image/jpeg", frame.bytes.clone(), self.timeout)?;
        if !response.is_success() {
            return Err(AppError::Classifier(format!(
                "http status {} ({})",
                response.status,
                response.body_text().trim()
            )));
        }
        parse_detections(&response.body)
    }
}

fn parse_detections(body: &[u8]) -> Result<Vec<Detection>, AppError> {
    let parsed: DetectResponse = serde_json::from_slice(body)
        .map_err(|err| AppError::Classifier(format!("json error: {err}")))?;
    Ok(parsed.detections)
}
