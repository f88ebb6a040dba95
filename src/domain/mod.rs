//! Domain layer types for provider supervision.
//!
//! This module contains the lifecycle state model, health check results and
//! the statistics/diagnostics read-models the lifecycle engine produces.

mod diagnostics;
mod health;
mod state;
mod types;

pub use diagnostics::{PerformanceDataPoint, ProviderDiagnostics, ProviderStatistics};
pub use health::{HealthCheckResult, HealthStatus};
pub use state::{ProviderState, ProviderStateInfo, UNHEALTHY_FAILURE_THRESHOLD};
pub use types::{ProviderId, ProviderKind};
