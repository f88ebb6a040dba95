//! Provider contract and lifecycle hook definitions.
//!
//! Hosts (startup orchestration, status dashboards) talk to providers through
//! [`ManagedProvider`] and [`Provider`]. Concrete integrations plug their
//! business logic into the engine through [`LifecycleHooks`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::{
    HealthCheckResult, ProviderDiagnostics, ProviderId, ProviderKind, ProviderState,
    ProviderStateInfo,
};

use super::config::ProviderConfig;
use super::error::ProviderResult;
use super::events::{MetricsUpdatedEvent, OperationCompletedEvent, StateChangedEvent};

/// Business-specific behaviour injected into a
/// [`LifecycleEngine`](super::LifecycleEngine) at construction.
///
/// Only initialization and shutdown are mandatory; the remaining hooks
/// default to no-ops and a healthy health check.
#[async_trait]
pub trait LifecycleHooks<C: ProviderConfig>: Send + Sync + 'static {
    /// Connects, authenticates or opens whatever the provider needs.
    async fn perform_initialization(&self, config: &C) -> ProviderResult<()>;

    /// Releases provider resources. Failures are logged, never propagated.
    async fn perform_shutdown(&self) -> ProviderResult<()>;

    /// Provider-specific health probe, only called while Ready or Busy.
    async fn perform_health_check(&self) -> HealthCheckResult {
        HealthCheckResult::healthy("Provider is healthy")
    }

    /// Extra validation on top of the configuration's own rules.
    fn validate_custom_configuration(&self, _config: &C) -> ProviderResult<()> {
        Ok(())
    }

    /// Applies a new configuration to a running provider.
    async fn apply_configuration_update(&self, _config: &C) -> ProviderResult<()> {
        Ok(())
    }

    /// Clears provider-specific caches before re-initialization.
    async fn perform_reset(&self) -> ProviderResult<()> {
        Ok(())
    }
}

/// Configuration-independent view of a supervised provider.
///
/// Object safe, so a host can hold mail, LLM, storage and contacts
/// providers side by side as `Arc<dyn ManagedProvider>`.
#[async_trait]
pub trait ManagedProvider: Send + Sync {
    fn id(&self) -> &ProviderId;

    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    fn state(&self) -> ProviderState;

    /// Current immutable state snapshot.
    fn state_info(&self) -> Arc<ProviderStateInfo>;

    /// Ready or Busy, with fewer than three consecutive failures.
    fn is_healthy(&self) -> bool;

    /// Current metric values.
    fn metrics(&self) -> HashMap<String, f64>;

    /// Point-in-time diagnostics snapshot.
    fn diagnostics(&self) -> ProviderDiagnostics;

    async fn health_check(&self) -> HealthCheckResult;

    /// Always completes; hook failures are logged only.
    async fn shutdown(&self) -> ProviderResult<()>;

    /// Clears history and re-initializes with the stored configuration.
    async fn reset(&self) -> ProviderResult<()>;

    /// Suspends the provider, optionally resuming after `duration`.
    fn suspend(&self, duration: Option<Duration>, reason: Option<&str>) -> ProviderResult<()>;

    /// Resumes a suspended provider.
    fn resume(&self) -> ProviderResult<()>;

    /// Waits until the provider reaches `target` or `timeout` elapses.
    async fn wait_for_state(&self, target: ProviderState, timeout: Duration) -> ProviderResult<()>;

    fn subscribe_state_changes(&self) -> broadcast::Receiver<StateChangedEvent>;

    fn subscribe_operations(&self) -> broadcast::Receiver<OperationCompletedEvent>;

    fn subscribe_metrics(&self) -> broadcast::Receiver<MetricsUpdatedEvent>;
}

/// Full provider contract, including the configuration-typed operations.
#[async_trait]
pub trait Provider: ManagedProvider {
    type Config: ProviderConfig;

    /// The active configuration, if one has been accepted.
    fn configuration(&self) -> Option<Self::Config>;

    async fn initialize(&self, config: Self::Config) -> ProviderResult<()>;

    fn validate_configuration(&self, config: &Self::Config) -> ProviderResult<()>;

    async fn update_configuration(&self, config: Self::Config) -> ProviderResult<()>;
}
