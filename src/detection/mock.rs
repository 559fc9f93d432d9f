use crate::detection::{Detection, Frame, FrameSource, VehicleClassifier};
use crate::error::AppError;
use std::collections::VecDeque;
use std::time::Instant;

#[derive(Debug, Clone)]
pub enum MockFrame {
    Ok,
    CaptureFails,
}

/// Frame source that replays a script, then keeps returning good frames.
#[derive(Debug, Default)]
pub struct MockFrameSource {
    script: VecDeque<MockFrame>,
    captured: usize,
}

impl MockFrameSource {
    pub fn new(script: Vec<MockFrame>) -> Self {
        Self {
            script: script.into(),
            captured: 0,
        }
    }

    pub fn captured(&self) -> usize {
        self.captured
    }
}

impl FrameSource for MockFrameSource {
    fn capture(&mut self) -> Result<Frame, AppError> {
        self.captured += 1;
        match self.script.pop_front().unwrap_or(MockFrame::Ok) {
            MockFrame::Ok => Ok(Frame {
                bytes: vec![0xff, 0xd8, 0xff],
                captured_at: Instant::now(),
            }),
            MockFrame::CaptureFails => Err(AppError::Capture("mock capture failed".to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub enum MockDetections {
    Vehicle { class_name: &'static str, confidence: f64 },
    Nothing,
    Fails,
}

impl MockDetections {
    pub fn bus(confidence: f64) -> Self {
        MockDetections::Vehicle {
            class_name: "bus",
            confidence,
        }
    }

    pub fn car(confidence: f64) -> Self {
        MockDetections::Vehicle {
            class_name: "car",
            confidence,
        }
    }
}

/// Classifier that replays a script, then reports an empty scene.
#[derive(Debug, Default)]
pub struct MockClassifier {
    script: VecDeque<MockDetections>,
}

impl MockClassifier {
    pub fn new(script: Vec<MockDetections>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl VehicleClassifier for MockClassifier {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, AppError> {
        match self.script.pop_front().unwrap_or(MockDetections::Nothing) {
            MockDetections::Vehicle {
                class_name,
                confidence,
            } => Ok(vec![Detection {
                class_name: class_name.to_string(),
                confidence,
                bbox: None,
            }]),
            MockDetections::Nothing => Ok(Vec::new()),
            MockDetections::Fails => Err(AppError::Classifier("mock classifier failed".to_string())),
        }
    }
}
