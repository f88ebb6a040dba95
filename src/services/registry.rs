//! Registry of supervised providers.
//!
//! The [`ProviderRegistry`] is what startup orchestration and the status
//! dashboard talk to: it holds every provider as an
//! `Arc<dyn ManagedProvider>` and fans lifecycle calls out across them.
//!
//! # Example
//!
//! ```ignore
//! let registry = ProviderRegistry::new();
//! registry.register(mail.clone()).await?;
//! registry.register(llm.clone()).await?;
//!
//! registry.wait_all_ready(Duration::from_secs(10)).await?;
//! let report = registry.health_report().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::{
    HealthCheckResult, HealthStatus, ProviderDiagnostics, ProviderId, ProviderKind, ProviderState,
};
use crate::providers::{ManagedProvider, ProviderResult};

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("provider already registered: {0}")]
    AlreadyRegistered(ProviderId),

    #[error("provider not found: {0}")]
    NotFound(ProviderId),
}

/// Health of one registered provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider_id: ProviderId,
    pub name: String,
    pub kind: ProviderKind,
    pub state: ProviderState,
    pub result: HealthCheckResult,
}

/// Aggregated health of every registered provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst status across all providers; Healthy when none are registered.
    pub overall: HealthStatus,
    pub providers: Vec<ProviderHealth>,
}

impl HealthReport {
    /// Providers whose status is worse than Healthy.
    pub fn unhealthy(&self) -> impl Iterator<Item = &ProviderHealth> {
        self.providers
            .iter()
            .filter(|p| p.result.status != HealthStatus::Healthy)
    }
}

/// Holds providers in registration order.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<Vec<Arc<dyn ManagedProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider. Ids must be unique.
    pub async fn register(&self, provider: Arc<dyn ManagedProvider>) -> Result<(), RegistryError> {
        let mut providers = self.providers.write().await;
        if providers.iter().any(|p| p.id() == provider.id()) {
            return Err(RegistryError::AlreadyRegistered(provider.id().clone()));
        }

        tracing::debug!(provider = %provider.name(), kind = provider.kind().as_str(), "Provider registered");
        providers.push(provider);
        Ok(())
    }

    /// Removes a provider without shutting it down.
    pub async fn unregister(
        &self,
        id: &ProviderId,
    ) -> Result<Arc<dyn ManagedProvider>, RegistryError> {
        let mut providers = self.providers.write().await;
        let index = providers
            .iter()
            .position(|p| p.id() == id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        Ok(providers.remove(index))
    }

    pub async fn get(&self, id: &ProviderId) -> Option<Arc<dyn ManagedProvider>> {
        let providers = self.providers.read().await;
        providers.iter().find(|p| p.id() == id).cloned()
    }

    /// All providers of one kind, in registration order.
    pub async fn by_kind(&self, kind: ProviderKind) -> Vec<Arc<dyn ManagedProvider>> {
        let providers = self.providers.read().await;
        providers.iter().filter(|p| p.kind() == kind).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.providers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.providers.read().await.is_empty()
    }

    /// Cloned list so no lock is held while calling into providers.
    async fn snapshot(&self) -> Vec<Arc<dyn ManagedProvider>> {
        self.providers.read().await.clone()
    }

    /// Runs every provider's health check and aggregates the results.
    pub async fn health_report(&self) -> HealthReport {
        let providers = self.snapshot().await;
        let checks = providers.iter().map(|p| p.health_check());
        let results = futures::future::join_all(checks).await;

        let mut overall = HealthStatus::Healthy;
        let providers: Vec<ProviderHealth> = providers
            .iter()
            .zip(results)
            .map(|(provider, result)| {
                overall = overall.worst(result.status);
                ProviderHealth {
                    provider_id: provider.id().clone(),
                    name: provider.name().to_string(),
                    kind: provider.kind(),
                    state: provider.state(),
                    result,
                }
            })
            .collect();

        HealthReport { overall, providers }
    }

    /// Diagnostics for every provider, in registration order.
    pub async fn diagnostics(&self) -> Vec<ProviderDiagnostics> {
        self.snapshot()
            .await
            .iter()
            .map(|p| p.diagnostics())
            .collect()
    }

    /// Waits until every provider is Ready.
    ///
    /// Providers are awaited concurrently against the same timeout; the
    /// error lists every provider that did not make it.
    pub async fn wait_all_ready(&self, timeout: Duration) -> anyhow::Result<()> {
        let providers = self.snapshot().await;
        let waits = providers
            .iter()
            .map(|p| p.wait_for_state(ProviderState::Ready, timeout));
        let results = futures::future::join_all(waits).await;

        let failed: Vec<String> = providers
            .iter()
            .zip(results)
            .filter_map(|(provider, result)| {
                result
                    .err()
                    .map(|_| format!("{} ({})", provider.name(), provider.state()))
            })
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("providers not ready: {}", failed.join(", "))
        }
    }

    /// Suspends every provider, returning each outcome.
    pub async fn suspend_all(
        &self,
        duration: Option<Duration>,
        reason: Option<&str>,
    ) -> Vec<(ProviderId, ProviderResult<()>)> {
        self.snapshot()
            .await
            .iter()
            .map(|p| (p.id().clone(), p.suspend(duration, reason)))
            .collect()
    }

    /// Resumes every suspended provider.
    pub async fn resume_all(&self) -> Vec<(ProviderId, ProviderResult<()>)> {
        self.snapshot()
            .await
            .iter()
            .filter(|p| p.state() == ProviderState::Suspended)
            .map(|p| (p.id().clone(), p.resume()))
            .collect()
    }

    /// Shuts every provider down in reverse registration order.
    ///
    /// Shutdown never fails, so this always completes.
    pub async fn shutdown_all(&self) {
        let providers = self.snapshot().await;
        for provider in providers.iter().rev() {
            if let Err(e) = provider.shutdown().await {
                tracing::warn!(provider = %provider.name(), error = %e, "Shutdown reported an error");
            }
        }
        tracing::info!(count = providers.len(), "All providers shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{BaseProviderConfig, LifecycleEngine, LifecycleHooks};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHooks {
        shutdowns: Arc<AtomicUsize>,
        degraded: bool,
    }

    #[async_trait]
    impl LifecycleHooks<BaseProviderConfig> for CountingHooks {
        async fn perform_initialization(&self, _config: &BaseProviderConfig) -> ProviderResult<()> {
            Ok(())
        }

        async fn perform_shutdown(&self) -> ProviderResult<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn perform_health_check(&self) -> HealthCheckResult {
            if self.degraded {
                HealthCheckResult::degraded("slow upstream")
            } else {
                HealthCheckResult::healthy("ok")
            }
        }
    }

    async fn ready_engine(
        name: &str,
        kind: ProviderKind,
        hooks: CountingHooks,
    ) -> Arc<LifecycleEngine<BaseProviderConfig, CountingHooks>> {
        let engine = LifecycleEngine::new(name, kind, hooks);
        engine
            .initialize(BaseProviderConfig::new(name))
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let registry = ProviderRegistry::new();
        let engine = ready_engine("gmail", ProviderKind::Mail, CountingHooks::default()).await;

        registry.register(engine.clone()).await.unwrap();
        let result = registry.register(engine.clone()).await;

        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn unregister_and_lookup() {
        let registry = ProviderRegistry::new();
        let engine = ready_engine("gmail", ProviderKind::Mail, CountingHooks::default()).await;
        let id = engine.id().clone();

        registry.register(engine).await.unwrap();
        assert!(registry.get(&id).await.is_some());
        assert_eq!(registry.by_kind(ProviderKind::Mail).await.len(), 1);
        assert!(registry.by_kind(ProviderKind::Llm).await.is_empty());

        registry.unregister(&id).await.unwrap();
        assert!(registry.is_empty().await);
        assert!(matches!(
            registry.unregister(&id).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn health_report_takes_worst_status() {
        let registry = ProviderRegistry::new();
        let mail = ready_engine("gmail", ProviderKind::Mail, CountingHooks::default()).await;
        let llm = ready_engine(
            "anthropic",
            ProviderKind::Llm,
            CountingHooks {
                degraded: true,
                ..Default::default()
            },
        )
        .await;

        registry.register(mail).await.unwrap();
        registry.register(llm).await.unwrap();

        let report = registry.health_report().await;
        assert_eq!(report.overall, HealthStatus::Degraded);
        assert_eq!(report.providers.len(), 2);
        assert_eq!(report.unhealthy().count(), 1);
    }

    #[tokio::test]
    async fn empty_registry_is_healthy() {
        let report = ProviderRegistry::new().health_report().await;
        assert_eq!(report.overall, HealthStatus::Healthy);
        assert!(report.providers.is_empty());
    }

    #[tokio::test]
    async fn wait_all_ready_reports_laggards() {
        let registry = ProviderRegistry::new();
        let ready = ready_engine("gmail", ProviderKind::Mail, CountingHooks::default()).await;
        let idle: Arc<LifecycleEngine<BaseProviderConfig, CountingHooks>> =
            LifecycleEngine::new("contacts", ProviderKind::Contacts, CountingHooks::default());

        registry.register(ready).await.unwrap();
        registry.register(idle).await.unwrap();

        let err = registry
            .wait_all_ready(Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("contacts (uninitialized)"));
    }

    #[tokio::test]
    async fn suspend_and_resume_all() {
        let registry = ProviderRegistry::new();
        let mail = ready_engine("gmail", ProviderKind::Mail, CountingHooks::default()).await;
        registry.register(mail.clone()).await.unwrap();

        let results = registry.suspend_all(None, Some("offline")).await;
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(mail.state(), ProviderState::Suspended);

        let results = registry.resume_all().await;
        assert_eq!(results.len(), 1);
        assert_eq!(mail.state(), ProviderState::Ready);
    }

    #[tokio::test]
    async fn shutdown_all_runs_every_hook() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let registry = ProviderRegistry::new();

        for (name, kind) in [("gmail", ProviderKind::Mail), ("vault", ProviderKind::Storage)] {
            let hooks = CountingHooks {
                shutdowns: shutdowns.clone(),
                ..Default::default()
            };
            registry
                .register(ready_engine(name, kind, hooks).await)
                .await
                .unwrap();
        }

        registry.shutdown_all().await;

        assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
        for diag in registry.diagnostics().await {
            assert_eq!(diag.state_info.state, ProviderState::Shutdown);
        }
    }
}
