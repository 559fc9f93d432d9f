use crate::actuator::ActuatorKind;
use crate::actuator::mqtt::{self, MqttSettings};
use crate::barrier::controller::ControllerConfig;
use crate::barrier::policy::{self, DebouncePolicy, RetryPolicy, TimeoutPolicy};
use crate::barrier::BarrierState;
use crate::detection::{self, ClassFilter};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 5000;
pub const DEFAULT_CAMERA_URL: &str = "http://192.168.1.31/capture";
pub const DEFAULT_CLASSIFIER_URL: &str = "http://127.0.0.1:8500/detect";
pub const DEFAULT_ACTUATOR_URL: &str = "http://192.168.1.32/control";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub camera: Option<CameraSection>,
    #[serde(default)]
    pub classifier: Option<ClassifierSection>,
    #[serde(default)]
    pub barrier: Option<BarrierSection>,
    #[serde(default)]
    pub actuator: Option<ActuatorSection>,
    #[serde(default)]
    pub mqtt: Option<MqttSection>,
    #[serde(default)]
    pub detection: Option<DetectionSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraSection {
    pub capture_url: Option<String>,
    pub timeout_ms: Option<u64>,
    /// Largest accepted frame (default: 5 MiB)
    pub max_frame_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierSection {
    pub endpoint: Option<String>,
    pub timeout_ms: Option<u64>,
    /// Largest accepted detection response (default: 1 MiB)
    pub max_response_bytes: Option<usize>,
    /// Minimum per-detection confidence (default: 0.6)
    pub confidence_threshold: Option<f64>,
    /// Object classes that count as a vehicle (default: bus, car)
    pub tracked_classes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BarrierSection {
    pub window_secs: Option<u64>,
    /// Consecutive vehicle frames needed to close (default: 3)
    pub close_streak: Option<usize>,
    /// Mean confidence the close streak must exceed (default: 0.7)
    pub close_confidence: Option<f64>,
    /// Consecutive clear frames needed to open (default: 2)
    pub open_streak: Option<usize>,
    pub initial_state: Option<BarrierState>,
    pub timeout_policy: Option<TimeoutPolicy>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ActuatorSection {
    /// `http` (default) or `mqtt`
    pub transport: Option<ActuatorKind>,
    pub endpoint: Option<String>,
    pub max_attempts: Option<u32>,
    pub attempt_timeout_ms: Option<u64>,
    pub failure_backoff_ms: Option<u64>,
    pub timeout_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MqttSection {
    pub broker: Option<String>,
    /// Broker port (default: 8883)
    pub port: Option<u16>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Command topic (default: smarttrain/palang)
    pub topic: Option<String>,
    /// Position report topic (default: same as `topic`)
    pub status_topic: Option<String>,
    /// Connect over TLS (default: true)
    pub tls: Option<bool>,
    pub keep_alive_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionSection {
    /// Delay between frames in milliseconds (default: 100)
    pub interval_ms: Option<u64>,
    /// Start detecting at boot if the camera answers (default: true)
    pub autostart: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 5000)
    pub port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

fn millis(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let debounce = self.debounce_policy();
        if debounce.close_streak == 0 || debounce.open_streak == 0 {
            return Err(ConfigError::Invalid(
                "barrier streak lengths must be at least 1".to_string(),
            ));
        }
        if debounce.open_streak > debounce.close_streak {
            return Err(ConfigError::Invalid(format!(
                "open_streak ({}) must not exceed close_streak ({})",
                debounce.open_streak, debounce.close_streak
            )));
        }
        if !(0.0..=1.0).contains(&debounce.close_confidence) {
            return Err(ConfigError::Invalid(format!(
                "close_confidence {} outside [0, 1]",
                debounce.close_confidence
            )));
        }
        if debounce.window.is_zero() {
            return Err(ConfigError::Invalid("window_secs must be positive".to_string()));
        }
        if self.retry_policy().max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "actuator max_attempts must be at least 1".to_string(),
            ));
        }
        if self.camera_max_frame_bytes() == 0 || self.classifier_max_response_bytes() == 0 {
            return Err(ConfigError::Invalid(
                "body size limits must be positive".to_string(),
            ));
        }
        if self.actuator_kind() == ActuatorKind::Mqtt {
            let Some(settings) = self.mqtt_settings() else {
                return Err(ConfigError::Invalid(
                    "actuator transport \"mqtt\" needs [mqtt].broker".to_string(),
                ));
            };
            if settings.client_id.trim().is_empty() || settings.client_id.starts_with(' ') {
                return Err(ConfigError::Invalid("mqtt client_id must not be blank".to_string()));
            }
        }
        Ok(())
    }

    pub fn log_level(&self) -> tracing::Level {
        self.logging.level.parse().unwrap_or(tracing::Level::INFO)
    }

    pub fn camera_url(&self) -> &str {
        self.camera
            .as_ref()
            .and_then(|c| c.capture_url.as_deref())
            .unwrap_or(DEFAULT_CAMERA_URL)
    }

    pub fn camera_timeout(&self) -> Duration {
        millis(
            self.camera.as_ref().and_then(|c| c.timeout_ms),
            detection::capture::DEFAULT_CAPTURE_TIMEOUT,
        )
    }

    pub fn camera_max_frame_bytes(&self) -> usize {
        self.camera
            .as_ref()
            .and_then(|c| c.max_frame_bytes)
            .unwrap_or(detection::capture::DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn classifier_url(&self) -> &str {
        self.classifier
            .as_ref()
            .and_then(|c| c.endpoint.as_deref())
            .unwrap_or(DEFAULT_CLASSIFIER_URL)
    }

    pub fn classifier_timeout(&self) -> Duration {
        millis(
            self.classifier.as_ref().and_then(|c| c.timeout_ms),
            detection::remote::DEFAULT_CLASSIFIER_TIMEOUT,
        )
    }

    pub fn classifier_max_response_bytes(&self) -> usize {
        self.classifier
            .as_ref()
            .and_then(|c| c.max_response_bytes)
            .unwrap_or(detection::remote::DEFAULT_MAX_RESPONSE_BYTES)
    }

    pub fn class_filter(&self) -> ClassFilter {
        let section = self.classifier.as_ref();
        let classes = section
            .and_then(|c| c.tracked_classes.clone())
            .unwrap_or_else(|| {
                detection::DEFAULT_TRACKED_CLASSES
                    .iter()
                    .map(|c| c.to_string())
                    .collect()
            });
        let threshold = section
            .and_then(|c| c.confidence_threshold)
            .unwrap_or(detection::DEFAULT_CONFIDENCE_THRESHOLD);
        ClassFilter::new(classes, threshold)
    }

    pub fn debounce_policy(&self) -> DebouncePolicy {
        let defaults = DebouncePolicy::default();
        let Some(section) = self.barrier.as_ref() else {
            return defaults;
        };
        DebouncePolicy {
            window: section
                .window_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.window),
            close_streak: section.close_streak.unwrap_or(defaults.close_streak),
            close_confidence: section.close_confidence.unwrap_or(defaults.close_confidence),
            open_streak: section.open_streak.unwrap_or(defaults.open_streak),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let section = self.actuator.as_ref();
        RetryPolicy {
            max_attempts: section
                .and_then(|a| a.max_attempts)
                .unwrap_or(policy::DEFAULT_MAX_ATTEMPTS),
            attempt_timeout: millis(
                section.and_then(|a| a.attempt_timeout_ms),
                policy::DEFAULT_ATTEMPT_TIMEOUT,
            ),
            failure_backoff: millis(
                section.and_then(|a| a.failure_backoff_ms),
                policy::DEFAULT_FAILURE_BACKOFF,
            ),
            timeout_backoff: millis(
                section.and_then(|a| a.timeout_backoff_ms),
                policy::DEFAULT_TIMEOUT_BACKOFF,
            ),
            on_timeout: self
                .barrier
                .as_ref()
                .and_then(|b| b.timeout_policy)
                .unwrap_or_default(),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            debounce: self.debounce_policy(),
            retry: self.retry_policy(),
            initial_state: self
                .barrier
                .as_ref()
                .and_then(|b| b.initial_state)
                .unwrap_or(BarrierState::Up),
        }
    }

    pub fn actuator_url(&self) -> &str {
        self.actuator
            .as_ref()
            .and_then(|a| a.endpoint.as_deref())
            .unwrap_or(DEFAULT_ACTUATOR_URL)
    }

    pub fn actuator_kind(&self) -> ActuatorKind {
        self.actuator
            .as_ref()
            .and_then(|a| a.transport)
            .unwrap_or_default()
    }

    /// Broker settings, or `None` when no broker is configured.
    pub fn mqtt_settings(&self) -> Option<MqttSettings> {
        let section = self.mqtt.as_ref()?;
        let broker = section.broker.clone()?;
        let mut settings = MqttSettings::new(broker);
        if let Some(port) = section.port {
            settings.port = port;
        }
        if let Some(client_id) = &section.client_id {
            settings.client_id = client_id.clone();
        }
        settings.username = section.username.clone();
        settings.password = section.password.clone();
        if let Some(topic) = &section.topic {
            settings.topic = topic.clone();
        }
        settings.status_topic = section
            .status_topic
            .clone()
            .unwrap_or_else(|| settings.topic.clone());
        settings.tls = section.tls.unwrap_or(true);
        settings.keep_alive = section
            .keep_alive_secs
            .map(Duration::from_secs)
            .unwrap_or(mqtt::DEFAULT_KEEP_ALIVE);
        Some(settings)
    }

    pub fn frame_interval(&self) -> Duration {
        millis(
            self.detection.as_ref().and_then(|d| d.interval_ms),
            crate::pipeline::DEFAULT_FRAME_INTERVAL,
        )
    }

    pub fn autostart(&self) -> bool {
        self.detection
            .as_ref()
            .and_then(|d| d.autostart)
            .unwrap_or(true)
    }

    /// Returns the server port (default: 5000)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }
}
