//! heap-lifecycle - supervision demo host
//!
//! Brings up a simulated language-model provider, runs a few operations
//! through it, suspends it for a short rate-limit window and prints its
//! diagnostics. Settings are read from the path in `HEAP_LIFECYCLE_CONFIG`
//! when set.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use heap_lifecycle::config::LifecycleSettings;
use heap_lifecycle::domain::{HealthCheckResult, ProviderKind, ProviderState};
use heap_lifecycle::providers::{BaseProviderConfig, ProviderError, ProviderResult};
use heap_lifecycle::services::ProviderRegistry;
use heap_lifecycle::{LifecycleEngine, LifecycleHooks};

/// Stand-in for a hosted model that rejects every fourth prompt.
#[derive(Default)]
struct SimulatedModel {
    prompts: AtomicU32,
}

impl SimulatedModel {
    async fn complete(&self, prompt: &str) -> ProviderResult<String> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let n = self.prompts.fetch_add(1, Ordering::SeqCst) + 1;
        if n % 4 == 0 {
            return Err(ProviderError::Provider("model overloaded".to_string()));
        }
        Ok(format!("summary of '{}'", prompt))
    }
}

#[async_trait]
impl LifecycleHooks<BaseProviderConfig> for SimulatedModel {
    async fn perform_initialization(&self, config: &BaseProviderConfig) -> ProviderResult<()> {
        tracing::info!(model = %config.name, "Connecting to model endpoint");
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }

    async fn perform_shutdown(&self) -> ProviderResult<()> {
        tracing::info!(prompts = self.prompts.load(Ordering::SeqCst), "Closing model session");
        Ok(())
    }

    async fn perform_health_check(&self) -> HealthCheckResult {
        HealthCheckResult::healthy("Model endpoint reachable")
            .with_data("prompts", self.prompts.load(Ordering::SeqCst).to_string())
    }
}

fn load_settings() -> anyhow::Result<LifecycleSettings> {
    match std::env::var_os("HEAP_LIFECYCLE_CONFIG") {
        Some(path) => LifecycleSettings::load(&path)
            .with_context(|| format!("loading settings from {}", path.to_string_lossy())),
        None => Ok(LifecycleSettings::default()),
    }
}

async fn run() -> anyhow::Result<()> {
    let settings = load_settings()?;
    let engine = LifecycleEngine::with_settings(
        "summarizer",
        ProviderKind::Llm,
        SimulatedModel::default(),
        settings,
    )?;

    let mut state_changes = engine.subscribe_state_changes();
    tokio::spawn(async move {
        while let Ok(event) = state_changes.recv().await {
            tracing::info!(from = %event.previous, to = %event.current, "{}", event.description);
        }
    });

    let registry = ProviderRegistry::new();
    registry.register(engine.clone()).await?;

    let config = BaseProviderConfig::new("summarizer")
        .with_endpoint("https://models.example.com/v1")
        .with_api_key("demo-key")
        .with_timeout(Duration::from_secs(10));
    engine.initialize(config).await?;

    let subjects = ["Quarterly report", "Lunch?", "Invoice #4411", "Weekly digest", "Re: offsite"];
    let calls = subjects.iter().map(|subject| {
        let engine = Arc::clone(&engine);
        async move {
            engine
                .execute_operation("Summarize", || engine.hooks().complete(subject))
                .await
        }
    });
    for (subject, result) in subjects.iter().zip(futures::future::join_all(calls).await) {
        match result {
            Ok(summary) => tracing::info!(subject, "{}", summary),
            Err(e) => tracing::warn!(subject, error = %e, "Summarize failed"),
        }
    }

    engine.suspend(Some(Duration::from_millis(200)), Some("rate limited"))?;
    engine
        .wait_for_state(ProviderState::Ready, Duration::from_secs(2))
        .await?;

    let report = registry.health_report().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("{}", serde_json::to_string_pretty(&engine.diagnostics())?);

    registry.shutdown_all().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting heap-lifecycle demo");

    if let Err(e) = run().await {
        tracing::error!("Demo failed: {:#}", e);
        std::process::exit(1);
    }
}
