use crate::actuator::{ActuatorTransport, SendOutcome};
use crate::barrier::BarrierCommand;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSendBehavior {
    Succeed,
    Fail,
    TimeOut,
}

/// Scripted transport. Each `send` consumes the next behaviour; once the
/// script is exhausted every attempt succeeds.
#[derive(Debug, Default)]
pub struct MockTransport {
    behaviors: Mutex<VecDeque<MockSendBehavior>>,
    sent: Mutex<Vec<BarrierCommand>>,
    latency: Duration,
}

impl MockTransport {
    pub fn new(behaviors: Vec<MockSendBehavior>) -> Self {
        Self {
            behaviors: Mutex::new(behaviors.into()),
            sent: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    pub fn always_succeeds() -> Self {
        Self::new(Vec::new())
    }

    /// Every attempt sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push_behaviors(&self, behaviors: impl IntoIterator<Item = MockSendBehavior>) {
        if let Ok(mut queue) = self.behaviors.lock() {
            queue.extend(behaviors);
        }
    }

    /// Every attempt so far, retries included.
    pub fn sent(&self) -> Vec<BarrierCommand> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn sent_count(&self, command: BarrierCommand) -> usize {
        self.sent().iter().filter(|c| **c == command).count()
    }
}

impl ActuatorTransport for MockTransport {
    fn send(&self, command: BarrierCommand, _timeout: Duration) -> SendOutcome {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(command);
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let behavior = self
            .behaviors
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or(MockSendBehavior::Succeed);
        match behavior {
            MockSendBehavior::Succeed => SendOutcome::Success,
            MockSendBehavior::Fail => SendOutcome::Failure("mock actuator rejected command".to_string()),
            MockSendBehavior::TimeOut => SendOutcome::Timeout,
        }
    }
}
