//! Lifecycle engine settings.
//!
//! Settings are plain JSON, typically embedded in the application's
//! `settings.json` under a `lifecycle` key, and every field falls back to
//! its default when omitted.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Upper bound on per-provider concurrency; shutdown drains by acquiring
/// every permit in one `u32`-sized request.
pub const MAX_CONCURRENT_OPERATIONS: usize = 65_535;

/// Tunables for a [`LifecycleEngine`](crate::providers::LifecycleEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Maximum business operations running at once per provider.
    pub max_concurrent_operations: usize,
    /// How long shutdown waits for in-flight operations to drain.
    #[serde(with = "duration_millis")]
    pub shutdown_grace_period: Duration,
    /// Polling interval used by `wait_for_state`.
    #[serde(with = "duration_millis")]
    pub state_poll_interval: Duration,
    /// Capacity of the recent-error buffer.
    pub max_recent_errors: usize,
    /// Capacity of the performance-history buffer.
    pub max_performance_points: usize,
    /// Errors included in a diagnostics snapshot.
    pub diagnostics_error_count: usize,
    /// Performance points included in a diagnostics snapshot.
    pub diagnostics_performance_count: usize,
    /// Buffer size of each event channel.
    pub event_channel_capacity: usize,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 10,
            shutdown_grace_period: Duration::from_secs(30),
            state_poll_interval: Duration::from_millis(100),
            max_recent_errors: 50,
            max_performance_points: 1000,
            diagnostics_error_count: 10,
            diagnostics_performance_count: 100,
            event_channel_capacity: 100,
        }
    }
}

impl LifecycleSettings {
    /// Default settings with a different concurrency limit.
    pub fn with_max_concurrent_operations(max: usize) -> Self {
        Self {
            max_concurrent_operations: max,
            ..Default::default()
        }
    }

    /// Sets the shutdown grace period.
    pub fn shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period = grace;
        self
    }

    /// Sets the `wait_for_state` polling interval.
    pub fn state_poll_interval(mut self, interval: Duration) -> Self {
        self.state_poll_interval = interval;
        self
    }

    /// Checks that every limit is usable.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_concurrent_operations == 0 {
            return Err(SettingsError::Invalid(
                "max_concurrent_operations must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_operations > MAX_CONCURRENT_OPERATIONS {
            return Err(SettingsError::Invalid(format!(
                "max_concurrent_operations exceeds {}",
                MAX_CONCURRENT_OPERATIONS
            )));
        }
        if self.state_poll_interval.is_zero() {
            return Err(SettingsError::Invalid(
                "state_poll_interval must be non-zero".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(SettingsError::Invalid(
                "event_channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses and validates settings from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads and validates settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
