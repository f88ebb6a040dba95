//! Health check result types.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a health check, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Operational with reduced capability, or not currently accepting work.
    Degraded,
    /// Reachable but failing its checks.
    Unhealthy,
    /// Unusable until re-initialized.
    Critical,
}

impl HealthStatus {
    /// Returns the worse of two statuses.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        self.max(other)
    }
}

/// Result of a single health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Overall status.
    pub status: HealthStatus,
    /// Human-readable explanation.
    pub message: String,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
    /// How long the check took, when measured.
    pub duration: Option<Duration>,
    /// Additional provider-specific details.
    pub data: HashMap<String, String>,
}

impl HealthCheckResult {
    /// Creates a result with the given status and message.
    pub fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            checked_at: Utc::now(),
            duration: None,
            data: HashMap::new(),
        }
    }

    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Healthy, message)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded, message)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Critical, message)
    }

    /// Sets the measured duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Adds a detail entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ordering() {
        assert!(HealthStatus::Healthy < HealthStatus::Degraded);
        assert!(HealthStatus::Unhealthy < HealthStatus::Critical);
        assert_eq!(
            HealthStatus::Degraded.worst(HealthStatus::Critical),
            HealthStatus::Critical
        );
        assert_eq!(
            HealthStatus::Degraded.worst(HealthStatus::Healthy),
            HealthStatus::Degraded
        );
    }

    #[test]
    fn result_builder() {
        let result = HealthCheckResult::degraded("slow responses")
            .with_duration(Duration::from_millis(12))
            .with_data("latency_ms", "850");

        assert_eq!(result.status, HealthStatus::Degraded);
        assert_eq!(result.duration, Some(Duration::from_millis(12)));
        assert_eq!(result.data.get("latency_ms"), Some(&"850".to_string()));
        assert!(!result.is_healthy());
    }
}
