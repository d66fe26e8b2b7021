// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

/// Engine configuration as read from a TOML file.
///
/// ```toml
/// [cluster]
/// namespace = "default"
///
/// [task]
/// default_image = "python:3.13-slim"
///
/// [logs]
/// schedule_timeout_secs = 300
/// poll_interval_ms = 1000
/// channel_capacity = 256
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEngineConfig {
    #[serde(default)]
    pub cluster: ClusterSection,

    #[serde(default)]
    pub task: TaskSection,

    #[serde(default)]
    pub logs: LogsSection,
}

/// `[cluster]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSection {
    /// Namespace every unit, claim and pod lives in.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
        }
    }
}

/// `[task]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSection {
    /// Image used when a task does not set `resources.image_id`.
    #[serde(default = "default_image")]
    pub default_image: String,
}

fn default_image() -> String {
    "python:3.13-slim".to_string()
}

impl Default for TaskSection {
    fn default() -> Self {
        Self {
            default_image: default_image(),
        }
    }
}

/// `[logs]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LogsSection {
    /// How long a log worker waits for its pod to start.
    #[serde(default = "default_schedule_timeout_secs")]
    pub schedule_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Capacity of the shared delivery channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_schedule_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            schedule_timeout_secs: default_schedule_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Validated engine configuration.
///
/// Only constructed through `TryFrom<RawEngineConfig>` (see `validate.rs`)
/// or [`EngineConfig::default`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub namespace: String,
    pub default_image: String,
    pub logs: LogOptions,
}

/// Tuning for the log stream coordinator.
#[derive(Debug, Clone, Copy)]
pub struct LogOptions {
    pub schedule_timeout: Duration,
    pub poll_interval: Duration,
    pub channel_capacity: usize,
}

impl From<&LogsSection> for LogOptions {
    fn from(section: &LogsSection) -> Self {
        Self {
            schedule_timeout: Duration::from_secs(section.schedule_timeout_secs),
            poll_interval: Duration::from_millis(section.poll_interval_ms),
            channel_capacity: section.channel_capacity,
        }
    }
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions::from(&LogsSection::default())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            default_image: default_image(),
            logs: LogOptions::default(),
        }
    }
}
