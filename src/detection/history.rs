use crate::detection::DetectionSample;
use std::collections::VecDeque;
use std::time::Duration;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// Recency-bounded record of vehicle-presence observations.
///
/// Every retained sample is younger than `window` relative to the newest sample.
#[derive(Debug, Clone)]
pub struct DetectionHistory {
    samples: VecDeque<DetectionSample>,
    window: Duration,
}

impl DetectionHistory {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&DetectionSample> {
        self.samples.back()
    }

    /// Insert a sample and purge everything that fell out of the window.
    ///
    /// A timestamp earlier than the newest retained one is clamped forward so
    /// the history stays ordered.
    pub fn append(&mut self, sample: DetectionSample) {
        let mut sample = sample.sanitized();
        if let Some(latest) = self.samples.back()
            && sample.timestamp < latest.timestamp
        {
            sample.timestamp = latest.timestamp;
        }
        let now = sample.timestamp;
        self.samples.push_back(sample);

        while let Some(oldest) = self.samples.front() {
            if now.saturating_duration_since(oldest.timestamp) >= self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// The `n` most recent samples, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<DetectionSample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).copied().collect()
    }

    pub fn all_true_in_last_n<P>(&self, n: usize, predicate: P) -> bool
    where
        P: Fn(&DetectionSample) -> bool,
    {
        if self.samples.len() < n {
            return false;
        }
        self.samples.iter().rev().take(n).all(predicate)
    }
}

impl Default for DetectionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
