//! Statistics, performance history and diagnostics read-models.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ProviderId, ProviderKind, ProviderStateInfo};
use crate::providers::RecordedError;

/// Running operation statistics for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatistics {
    /// Operations attempted, initialization included.
    pub total_operations: u64,
    /// Operations that returned success.
    pub successful_operations: u64,
    /// Operations that returned a failure or faulted.
    pub failed_operations: u64,
    /// Running mean of operation durations.
    pub average_operation_duration: Duration,
    /// When statistics collection started.
    pub started_at: DateTime<Utc>,
    /// Time since `started_at`, refreshed when diagnostics are taken.
    pub uptime: Duration,
    /// Number of times the provider was reset.
    pub reset_count: u32,
}

impl ProviderStatistics {
    /// Creates empty statistics starting now.
    pub fn new() -> Self {
        Self {
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            average_operation_duration: Duration::ZERO,
            started_at: Utc::now(),
            uptime: Duration::ZERO,
            reset_count: 0,
        }
    }

    /// Records one finished operation.
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.total_operations += 1;
        if success {
            self.successful_operations += 1;
        } else {
            self.failed_operations += 1;
        }

        // Incremental mean keeps the value exact without storing every sample.
        let n = self.total_operations as f64;
        let prev = self.average_operation_duration.as_secs_f64();
        let next = prev + (duration.as_secs_f64() - prev) / n;
        self.average_operation_duration = Duration::from_secs_f64(next.max(0.0));
    }

    /// Fraction of operations that succeeded, 0.0 when nothing ran yet.
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            0.0
        } else {
            self.successful_operations as f64 / self.total_operations as f64
        }
    }

    /// Returns a copy with `uptime` computed against `now`.
    pub fn with_uptime(&self, now: DateTime<Utc>) -> Self {
        let uptime = (now - self.started_at).to_std().unwrap_or(Duration::ZERO);
        Self {
            uptime,
            ..self.clone()
        }
    }
}

impl Default for ProviderStatistics {
    fn default() -> Self {
        Self::new()
    }
}

/// One timed operation in the performance history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceDataPoint {
    /// When the operation finished.
    pub timestamp: DateTime<Utc>,
    /// Operation name, e.g. `FetchMessages`.
    pub operation: String,
    /// How long it took.
    pub duration: Duration,
    /// Whether it succeeded.
    pub success: bool,
    /// Small free-form metadata.
    pub metadata: HashMap<String, String>,
}

impl PerformanceDataPoint {
    pub fn new(operation: impl Into<String>, duration: Duration, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: operation.into(),
            duration,
            success,
            metadata: HashMap::new(),
        }
    }

    /// Adds a metadata entry.
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Point-in-time aggregate of everything the engine knows about a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDiagnostics {
    /// Provider identifier.
    pub provider_id: ProviderId,
    /// Display name.
    pub name: String,
    /// Integration kind.
    pub kind: ProviderKind,
    /// Current state snapshot.
    pub state_info: ProviderStateInfo,
    /// Sanitized copy of the active configuration.
    pub configuration: Option<serde_json::Value>,
    /// Metric name to last recorded value.
    pub metrics: HashMap<String, f64>,
    /// Statistics with live uptime.
    pub statistics: ProviderStatistics,
    /// Most recent errors, oldest first.
    pub recent_errors: Vec<RecordedError>,
    /// Most recent performance points, oldest first.
    pub performance_history: Vec<PerformanceDataPoint>,
    /// When this snapshot was taken.
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_track_counts_and_mean() {
        let mut stats = ProviderStatistics::new();
        stats.record(Duration::from_millis(100), true);
        stats.record(Duration::from_millis(300), false);

        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.successful_operations, 1);
        assert_eq!(stats.failed_operations, 1);
        assert_eq!(stats.success_rate(), 0.5);

        let avg_ms = stats.average_operation_duration.as_secs_f64() * 1000.0;
        assert!((avg_ms - 200.0).abs() < 0.001);
    }

    #[test]
    fn success_rate_with_no_operations() {
        assert_eq!(ProviderStatistics::new().success_rate(), 0.0);
    }

    #[test]
    fn uptime_is_computed_against_now() {
        let stats = ProviderStatistics::new();
        let later = stats.started_at + chrono::Duration::seconds(90);

        assert_eq!(stats.with_uptime(later).uptime, Duration::from_secs(90));
        assert_eq!(stats.uptime, Duration::ZERO);
    }

    #[test]
    fn performance_point_metadata() {
        let point = PerformanceDataPoint::new("RefreshToken", Duration::from_millis(5), true)
            .meta("attempt", "1");

        assert_eq!(point.operation, "RefreshToken");
        assert!(point.success);
        assert_eq!(point.metadata.get("attempt"), Some(&"1".to_string()));
    }
}
