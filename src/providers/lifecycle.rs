//! Lifecycle engine shared by every supervised provider.
//!
//! The [`LifecycleEngine`] owns one provider's state machine, admission
//! control, statistics, metrics and suspension timer. Concrete providers
//! supply their business logic as [`LifecycleHooks`] and run their calls
//! through [`LifecycleEngine::execute_operation`].
//!
//! # Concurrency
//!
//! - The state snapshot lives behind a single mutex and is replaced
//!   wholesale on every change; readers get an `Arc` to an immutable record.
//! - A FIFO-fair semaphore bounds concurrent operations. Excess callers wait
//!   in arrival order.
//! - At most one suspension timer is pending per provider. Arming a new one
//!   cancels and replaces the previous handle under the timer lock.
//!
//! # Cancellation
//!
//! Cancellation is cooperative. A caller's [`CancellationToken`] stops it
//! from waiting for admission (or for a state), but an operation body that
//! has already been admitted always runs to completion.
//!
//! # Example
//!
//! ```ignore
//! let engine = LifecycleEngine::new("gmail", ProviderKind::Mail, GmailHooks::new());
//! engine.initialize(config).await?;
//!
//! let threads = engine
//!     .execute_operation("FetchMessages", || async { client.fetch_threads().await })
//!     .await?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{broadcast, Semaphore, SemaphorePermit};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{LifecycleSettings, SettingsError};
use crate::domain::{
    HealthCheckResult, PerformanceDataPoint, ProviderDiagnostics, ProviderId, ProviderKind,
    ProviderState, ProviderStateInfo, ProviderStatistics,
};

use super::config::{validate_common, ProviderConfig};
use super::error::{ProviderError, ProviderResult, RecordedError};
use super::events::{
    EventChannels, MetricsUpdatedEvent, OperationCompletedEvent, StateChangedEvent,
};
use super::metrics::{MetricsMap, RingBuffer};
use super::traits::{LifecycleHooks, ManagedProvider, Provider};

/// Metric holding the duration of the last run of each operation.
pub const OPERATION_DURATION_METRIC: &str = "operation_duration_ms";
/// Counter of finished operations.
pub const OPERATIONS_TOTAL_METRIC: &str = "operations_total";
/// Counter of failed or faulted operations.
pub const OPERATIONS_FAILED_METRIC: &str = "operations_failed";

const INITIALIZE_OPERATION: &str = "Initialize";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configuration errors surface from initialization as `Configuration`.
fn as_configuration_error(error: ProviderError) -> ProviderError {
    match error {
        ProviderError::Configuration(_) => error,
        other => ProviderError::Configuration(other.to_string()),
    }
}

struct StateCell {
    info: Arc<ProviderStateInfo>,
    in_flight: usize,
}

/// How a shutdown call proceeds, decided atomically with the state check.
enum ShutdownEntry {
    Finished,
    InProgress,
    /// Moved to ShuttingDown from the carried state; drain first.
    Draining(ProviderState),
    /// The state has no ShuttingDown edge; go straight to Shutdown.
    Direct(ProviderState),
}

struct SuspensionTimer {
    generation: u64,
    token: CancellationToken,
    // Held so the task is owned by the slot; dropping detaches it.
    _handle: JoinHandle<()>,
}

/// Supervisor for one provider instance.
///
/// Always handed out as `Arc<LifecycleEngine<..>>` so the suspension timer
/// can reach back into the engine without keeping it alive.
pub struct LifecycleEngine<C: ProviderConfig, H: LifecycleHooks<C>> {
    id: ProviderId,
    name: String,
    kind: ProviderKind,
    settings: LifecycleSettings,
    hooks: H,
    state: Mutex<StateCell>,
    config: Mutex<Option<C>>,
    semaphore: Semaphore,
    statistics: Mutex<ProviderStatistics>,
    recent_errors: Mutex<RingBuffer<RecordedError>>,
    performance: Mutex<RingBuffer<PerformanceDataPoint>>,
    metrics: Mutex<MetricsMap>,
    events: EventChannels,
    suspension: Mutex<Option<SuspensionTimer>>,
    timer_generation: AtomicU64,
    disposed: AtomicBool,
    self_ref: Weak<Self>,
}

/// Tracks one admitted operation; releases its slot however the call ends.
struct InFlightGuard<'a, C: ProviderConfig, H: LifecycleHooks<C>> {
    engine: &'a LifecycleEngine<C, H>,
    _permit: SemaphorePermit<'a>,
}

impl<C: ProviderConfig, H: LifecycleHooks<C>> Drop for InFlightGuard<'_, C, H> {
    fn drop(&mut self) {
        self.engine.end_operation();
    }
}

impl<C: ProviderConfig, H: LifecycleHooks<C>> LifecycleEngine<C, H> {
    /// Creates an engine with default settings.
    pub fn new(name: impl Into<String>, kind: ProviderKind, hooks: H) -> Arc<Self> {
        Self::build(name.into(), kind, hooks, LifecycleSettings::default())
    }

    /// Creates an engine with custom settings.
    pub fn with_settings(
        name: impl Into<String>,
        kind: ProviderKind,
        hooks: H,
        settings: LifecycleSettings,
    ) -> Result<Arc<Self>, SettingsError> {
        settings.validate()?;
        Ok(Self::build(name.into(), kind, hooks, settings))
    }

    /// Creates an engine limited to `max_concurrent_operations` at a time.
    pub fn with_max_concurrency(
        name: impl Into<String>,
        kind: ProviderKind,
        hooks: H,
        max_concurrent_operations: usize,
    ) -> Result<Arc<Self>, SettingsError> {
        Self::with_settings(
            name,
            kind,
            hooks,
            LifecycleSettings::with_max_concurrent_operations(max_concurrent_operations),
        )
    }

    fn build(name: String, kind: ProviderKind, hooks: H, settings: LifecycleSettings) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id: ProviderId::generate(kind.as_str()),
            name,
            kind,
            hooks,
            state: Mutex::new(StateCell {
                info: Arc::new(ProviderStateInfo::initial()),
                in_flight: 0,
            }),
            config: Mutex::new(None),
            semaphore: Semaphore::new(settings.max_concurrent_operations),
            statistics: Mutex::new(ProviderStatistics::new()),
            recent_errors: Mutex::new(RingBuffer::new(settings.max_recent_errors)),
            performance: Mutex::new(RingBuffer::new(settings.max_performance_points)),
            metrics: Mutex::new(MetricsMap::new()),
            events: EventChannels::new(settings.event_channel_capacity),
            suspension: Mutex::new(None),
            timer_generation: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            self_ref: self_ref.clone(),
            settings,
        })
    }

    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// The injected hooks, for providers that keep business state in them.
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn state(&self) -> ProviderState {
        lock(&self.state).info.state
    }

    pub fn state_info(&self) -> Arc<ProviderStateInfo> {
        Arc::clone(&lock(&self.state).info)
    }

    pub fn is_healthy(&self) -> bool {
        !self.is_disposed() && self.state_info().is_healthy()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Operations currently admitted and running.
    pub fn in_flight(&self) -> usize {
        lock(&self.state).in_flight
    }

    /// The active configuration, if one has been accepted.
    pub fn configuration(&self) -> Option<C> {
        lock(&self.config).clone()
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    /// Requests a transition to `to`.
    ///
    /// Transitions outside the table are rejected with a warning and leave
    /// the snapshot untouched. Returns whether the transition happened.
    pub fn update_state(
        &self,
        to: ProviderState,
        description: impl Into<String>,
        error: Option<ProviderError>,
    ) -> bool {
        self.update_state_with_context(to, description, error, HashMap::new())
    }

    /// Like [`update_state`](Self::update_state), attaching `context` to the
    /// new snapshot. Context is cleared by the next transition.
    pub fn update_state_with_context(
        &self,
        to: ProviderState,
        description: impl Into<String>,
        error: Option<ProviderError>,
        context: HashMap<String, String>,
    ) -> bool {
        let recorded = error.clone();
        let changed = {
            let mut cell = lock(&self.state);
            self.apply_transition_with_context(&mut cell, to, description.into(), error, context)
        };

        if changed && to == ProviderState::Error {
            if let Some(error) = recorded {
                lock(&self.recent_errors).push(RecordedError::new(None, error));
            }
        }
        changed
    }

    /// Transitions to `to` only if the current state is `expected`.
    fn transition_from(
        &self,
        expected: ProviderState,
        to: ProviderState,
        description: impl Into<String>,
    ) -> Result<(), ProviderState> {
        let mut cell = lock(&self.state);
        let current = cell.info.state;
        if current != expected {
            return Err(current);
        }
        if self.apply_transition(&mut cell, to, description.into(), None) {
            Ok(())
        } else {
            Err(current)
        }
    }

    fn apply_transition(
        &self,
        cell: &mut StateCell,
        to: ProviderState,
        description: String,
        error: Option<ProviderError>,
    ) -> bool {
        self.apply_transition_with_context(cell, to, description, error, HashMap::new())
    }

    fn apply_transition_with_context(
        &self,
        cell: &mut StateCell,
        to: ProviderState,
        description: String,
        error: Option<ProviderError>,
        context: HashMap<String, String>,
    ) -> bool {
        let from = cell.info.state;
        if !from.can_transition_to(to) {
            tracing::warn!(
                provider = %self.name,
                from = %from,
                to = %to,
                "Rejected illegal state transition"
            );
            return false;
        }

        let next = context.into_iter().fold(
            cell.info.transitioned(to, description, error),
            |info, (key, value)| info.with_context(key, value),
        );
        let next = Arc::new(next);
        cell.info = Arc::clone(&next);

        if to == ProviderState::Error {
            if let Some(error) = &next.error {
                tracing::error!(provider = %self.name, from = %from, error = %error, "Provider entered error state");
            }
        } else {
            tracing::debug!(provider = %self.name, from = %from, to = %to, "State changed");
        }

        // Emitted under the state lock so subscribers observe transitions in order.
        self.events.state_changed(StateChangedEvent {
            provider_id: self.id.clone(),
            previous: from,
            current: to,
            description: next.description.clone(),
            error: if to == ProviderState::Error {
                next.error.clone()
            } else {
                None
            },
            timestamp: next.last_transition,
        });
        true
    }

    /// Replaces the snapshot with a fresh `Uninitialized` one.
    fn force_uninitialized(&self, description: &str) {
        let mut cell = lock(&self.state);
        let previous = cell.info.state;
        let next = Arc::new(ProviderStateInfo {
            description: description.to_string(),
            ..ProviderStateInfo::initial()
        });
        cell.info = Arc::clone(&next);

        self.events.state_changed(StateChangedEvent {
            provider_id: self.id.clone(),
            previous,
            current: ProviderState::Uninitialized,
            description: next.description.clone(),
            error: None,
            timestamp: next.last_transition,
        });
    }

    /// Records a failure of `operation` and moves the provider to Error.
    ///
    /// The failure is recorded even if the provider already left the states
    /// that may enter Error, e.g. after a concurrent operation faulted first.
    fn record_fault(&self, operation: &str, description: String, error: ProviderError) {
        lock(&self.recent_errors).push(RecordedError::new(Some(operation), error.clone()));

        let mut cell = lock(&self.state);
        if cell.info.state == ProviderState::Error {
            tracing::debug!(provider = %self.name, operation, "Already in error state");
            return;
        }
        self.apply_transition(&mut cell, ProviderState::Error, description, Some(error));
    }

    fn ensure_not_disposed(&self, operation: &str) -> ProviderResult<()> {
        if self.is_disposed() {
            return Err(ProviderError::InvalidOperation(format!(
                "cannot {} '{}': provider has been disposed",
                operation, self.name
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Operation execution
    // ------------------------------------------------------------------

    /// Runs a business operation under the provider's shared guarantees.
    ///
    /// Fails fast with `InvalidOperation` unless the provider is Ready or
    /// Busy. A returned error is recorded but leaves the state alone; a
    /// panic inside `operation` is converted to `Unexpected` and moves the
    /// provider to `Error`.
    pub async fn execute_operation<T, F, Fut>(&self, name: &str, operation: F) -> ProviderResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        self.run_operation(name, None, operation).await
    }

    /// Like [`execute_operation`](Self::execute_operation), but gives up
    /// waiting for admission when `cancel` fires.
    ///
    /// The token is not observed once the operation has been admitted.
    pub async fn execute_operation_with_cancel<T, F, Fut>(
        &self,
        name: &str,
        cancel: &CancellationToken,
        operation: F,
    ) -> ProviderResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        self.run_operation(name, Some(cancel), operation).await
    }

    async fn run_operation<T, F, Fut>(
        &self,
        name: &str,
        cancel: Option<&CancellationToken>,
        operation: F,
    ) -> ProviderResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        self.ensure_not_disposed(name)?;
        let info = self.state_info();
        if !info.can_accept_operations() {
            return Err(ProviderError::InvalidOperation(format!(
                "cannot execute '{}' while provider '{}' is {}",
                name, self.name, info.state
            )));
        }

        let acquired = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        return Err(ProviderError::Cancelled(format!(
                            "'{}' was cancelled while waiting for admission",
                            name
                        )));
                    }
                    permit = self.semaphore.acquire() => permit,
                }
            }
            None => self.semaphore.acquire().await,
        };
        let permit = acquired.map_err(|_| {
            ProviderError::InvalidOperation(format!(
                "cannot execute '{}': provider '{}' has been disposed",
                name, self.name
            ))
        })?;

        let _guard = self.begin_operation(name, permit)?;

        let start = Instant::now();
        let outcome = AssertUnwindSafe(async move { operation().await })
            .catch_unwind()
            .await;
        let duration = start.elapsed();

        match outcome {
            Ok(Ok(value)) => {
                self.mark_success();
                self.finish_operation(name, duration, None);
                Ok(value)
            }
            Ok(Err(error)) => {
                tracing::debug!(provider = %self.name, operation = name, error = %error, "Operation failed");
                lock(&self.recent_errors).push(RecordedError::new(Some(name), error.clone()));
                self.finish_operation(name, duration, Some(&error));
                Err(error)
            }
            Err(payload) => {
                let error = ProviderError::from_panic(name, payload);
                tracing::error!(provider = %self.name, operation = name, error = %error, "Operation faulted");
                self.record_fault(name, format!("Operation '{}' faulted", name), error.clone());
                self.finish_operation(name, duration, Some(&error));
                Err(error)
            }
        }
    }

    /// Re-checks the state after admission and marks the provider Busy.
    fn begin_operation<'a>(
        &'a self,
        name: &str,
        permit: SemaphorePermit<'a>,
    ) -> ProviderResult<InFlightGuard<'a, C, H>> {
        let mut cell = lock(&self.state);
        if self.is_disposed() || !cell.info.can_accept_operations() {
            return Err(ProviderError::InvalidOperation(format!(
                "cannot execute '{}' while provider '{}' is {}",
                name, self.name, cell.info.state
            )));
        }

        cell.in_flight += 1;
        if cell.info.state == ProviderState::Ready {
            self.apply_transition(
                &mut cell,
                ProviderState::Busy,
                "Executing operations".to_string(),
                None,
            );
        }

        Ok(InFlightGuard {
            engine: self,
            _permit: permit,
        })
    }

    /// Returns to Ready once the last in-flight operation finishes.
    fn end_operation(&self) {
        let mut cell = lock(&self.state);
        cell.in_flight = cell.in_flight.saturating_sub(1);
        if cell.in_flight == 0 && cell.info.state == ProviderState::Busy {
            self.apply_transition(
                &mut cell,
                ProviderState::Ready,
                "Operations completed".to_string(),
                None,
            );
        }
    }

    fn mark_success(&self) {
        let mut cell = lock(&self.state);
        cell.info = Arc::new(cell.info.with_success(Utc::now()));
    }

    /// Updates statistics, history and metrics, then notifies subscribers.
    fn finish_operation(&self, name: &str, duration: Duration, error: Option<&ProviderError>) {
        let success = error.is_none();

        lock(&self.statistics).record(duration, success);

        let mut point = PerformanceDataPoint::new(name, duration, success);
        if let Some(error) = error {
            point = point.meta("error_kind", error.kind());
        }
        lock(&self.performance).push(point);

        let mut changed = HashMap::new();
        {
            let mut metrics = lock(&self.metrics);
            let mut tags = BTreeMap::new();
            tags.insert("operation".to_string(), name.to_string());
            let millis = duration.as_secs_f64() * 1000.0;
            let key = metrics.set(OPERATION_DURATION_METRIC, millis, &tags);
            changed.insert(key, millis);

            let (key, total) = metrics.increment(OPERATIONS_TOTAL_METRIC, 1.0);
            changed.insert(key, total);
            if !success {
                let (key, failed) = metrics.increment(OPERATIONS_FAILED_METRIC, 1.0);
                changed.insert(key, failed);
            }
        }
        self.events.metrics_updated(MetricsUpdatedEvent {
            provider_id: self.id.clone(),
            changed,
            cleared: false,
            timestamp: Utc::now(),
        });

        self.events.operation_completed(OperationCompletedEvent {
            provider_id: self.id.clone(),
            operation: name.to_string(),
            duration,
            success,
            error: error.cloned(),
            timestamp: Utc::now(),
        });
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Validates `config` and brings the provider to Ready.
    ///
    /// Allowed from Uninitialized, Error and Shutdown. Any failure moves the
    /// provider to Error. The whole call is counted as one operation.
    pub async fn initialize(&self, config: C) -> ProviderResult<()> {
        self.ensure_not_disposed("initialize")?;

        let start = Instant::now();
        if let Err(current) = self.try_enter_initializing() {
            return Err(ProviderError::InvalidOperation(format!(
                "cannot initialize provider '{}' while {}",
                self.name, current
            )));
        }

        let result = self.run_initialization(config).await;
        let duration = start.elapsed();

        match &result {
            Ok(()) => {
                self.update_state(ProviderState::Ready, "Provider initialized", None);
                tracing::info!(provider = %self.name, kind = self.kind.as_str(), "Provider initialized");
            }
            Err(error) => {
                self.record_fault(
                    INITIALIZE_OPERATION,
                    format!("Initialization failed: {}", error),
                    error.clone(),
                );
            }
        }

        self.finish_operation(INITIALIZE_OPERATION, duration, result.as_ref().err());
        result
    }

    fn try_enter_initializing(&self) -> Result<(), ProviderState> {
        let mut cell = lock(&self.state);
        let current = cell.info.state;
        let allowed = matches!(
            current,
            ProviderState::Uninitialized | ProviderState::Error | ProviderState::Shutdown
        );
        if allowed
            && self.apply_transition(
                &mut cell,
                ProviderState::Initializing,
                "Initializing provider".to_string(),
                None,
            )
        {
            Ok(())
        } else {
            Err(current)
        }
    }

    async fn run_initialization(&self, config: C) -> ProviderResult<()> {
        self.validate_configuration(&config)
            .map_err(as_configuration_error)?;

        *lock(&self.config) = Some(config.clone());

        AssertUnwindSafe(self.hooks.perform_initialization(&config))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(ProviderError::from_panic(INITIALIZE_OPERATION, payload)))
    }

    /// Runs basic and provider-specific validation on `config`.
    pub fn validate_configuration(&self, config: &C) -> ProviderResult<()> {
        validate_common(config)?;
        config.validate()?;
        self.hooks.validate_custom_configuration(config)
    }

    /// Validates and stores a new configuration, applying it immediately
    /// when the provider is running.
    pub async fn update_configuration(&self, config: C) -> ProviderResult<()> {
        self.ensure_not_disposed("update configuration of")?;
        self.validate_configuration(&config)
            .map_err(as_configuration_error)?;

        if self.state_info().can_accept_operations() {
            let applied = AssertUnwindSafe(self.hooks.apply_configuration_update(&config))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(ProviderError::from_panic("UpdateConfiguration", payload))
                });
            if let Err(error) = applied {
                tracing::warn!(provider = %self.name, error = %error, "Configuration update rejected");
                lock(&self.recent_errors)
                    .push(RecordedError::new(Some("UpdateConfiguration"), error.clone()));
                return Err(error);
            }
        }

        *lock(&self.config) = Some(config);
        tracing::info!(provider = %self.name, "Configuration updated");
        Ok(())
    }

    /// Shuts the provider down. Always completes.
    ///
    /// Waits up to the grace period for in-flight operations to drain,
    /// then runs the shutdown hook best-effort. A no-op once disposed.
    pub async fn shutdown(&self) -> ProviderResult<()> {
        if self.is_disposed() {
            return Ok(());
        }

        self.cancel_suspension_timer();

        let previous = match self.try_enter_shutting_down() {
            ShutdownEntry::Finished => return Ok(()),
            ShutdownEntry::InProgress => {
                // Another caller owns the shutdown; wait for it instead of racing.
                let grace = self.settings.shutdown_grace_period;
                if let Err(error) = self.wait_for_state(ProviderState::Shutdown, grace).await {
                    tracing::warn!(provider = %self.name, error = %error, "Concurrent shutdown did not finish in time");
                }
                return Ok(());
            }
            ShutdownEntry::Draining(previous) => {
                self.drain_operations().await;
                previous
            }
            ShutdownEntry::Direct(previous) => previous,
        };

        if previous != ProviderState::Uninitialized {
            self.run_shutdown_hook().await;
        }

        if !self.update_state(ProviderState::Shutdown, "Provider shut down", None) {
            tracing::warn!(provider = %self.name, state = %self.state(), "Shutdown finished without reaching Shutdown state");
        }
        tracing::info!(provider = %self.name, "Provider shut down");
        Ok(())
    }

    /// Decides, under the state lock, who owns this shutdown.
    fn try_enter_shutting_down(&self) -> ShutdownEntry {
        let mut cell = lock(&self.state);
        let current = cell.info.state;
        match current {
            ProviderState::Shutdown => ShutdownEntry::Finished,
            ProviderState::ShuttingDown => ShutdownEntry::InProgress,
            _ if current.can_transition_to(ProviderState::ShuttingDown) => {
                self.apply_transition(
                    &mut cell,
                    ProviderState::ShuttingDown,
                    "Shutting down".to_string(),
                    None,
                );
                ShutdownEntry::Draining(current)
            }
            _ => ShutdownEntry::Direct(current),
        }
    }

    async fn drain_operations(&self) {
        let capacity = self.settings.max_concurrent_operations;
        let permits = u32::try_from(capacity).unwrap_or(u32::MAX);
        let grace = self.settings.shutdown_grace_period;

        match tokio::time::timeout(grace, self.semaphore.acquire_many(permits)).await {
            Ok(Ok(all)) => drop(all),
            Ok(Err(_)) => {}
            Err(_) => {
                tracing::warn!(
                    provider = %self.name,
                    in_flight = self.in_flight(),
                    grace_ms = grace.as_millis() as u64,
                    "Operations still running after shutdown grace period"
                );
            }
        }
    }

    async fn run_shutdown_hook(&self) {
        let grace = self.settings.shutdown_grace_period;
        let hook = AssertUnwindSafe(self.hooks.perform_shutdown()).catch_unwind();

        match tokio::time::timeout(grace, hook).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(error))) => {
                tracing::warn!(provider = %self.name, error = %error, "Shutdown hook failed");
                lock(&self.recent_errors).push(RecordedError::new(Some("Shutdown"), error));
            }
            Ok(Err(payload)) => {
                let error = ProviderError::from_panic("Shutdown", payload);
                tracing::warn!(provider = %self.name, error = %error, "Shutdown hook panicked");
                lock(&self.recent_errors).push(RecordedError::new(Some("Shutdown"), error));
            }
            Err(_) => {
                tracing::warn!(provider = %self.name, "Shutdown hook timed out");
                lock(&self.recent_errors).push(RecordedError::new(
                    Some("Shutdown"),
                    ProviderError::Timeout("shutdown hook exceeded grace period".to_string()),
                ));
            }
        }
    }

    /// Clears error history and re-initializes with the stored configuration.
    ///
    /// Without a stored configuration the provider is left Uninitialized.
    pub async fn reset(&self) -> ProviderResult<()> {
        self.ensure_not_disposed("reset")?;

        let state = self.state();
        if state.is_transitioning() {
            return Err(ProviderError::InvalidOperation(format!(
                "cannot reset provider '{}' while {}",
                self.name, state
            )));
        }

        self.cancel_suspension_timer();
        lock(&self.recent_errors).clear();
        lock(&self.statistics).reset_count += 1;
        tracing::info!(provider = %self.name, from = %state, "Resetting provider");

        let reset = AssertUnwindSafe(self.hooks.perform_reset())
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(ProviderError::from_panic("Reset", payload)));
        if let Err(error) = reset {
            tracing::warn!(provider = %self.name, error = %error, "Reset hook failed");
            lock(&self.recent_errors).push(RecordedError::new(Some("Reset"), error.clone()));
            return Err(error);
        }

        self.force_uninitialized("Provider reset");

        match self.configuration() {
            Some(config) => self.initialize(config).await,
            None => Ok(()),
        }
    }

    /// Moves the provider to Suspended.
    ///
    /// With a `duration`, arms a timer that resumes the provider when it
    /// elapses, replacing any timer armed earlier. Without one the provider
    /// stays suspended until [`resume`](Self::resume).
    pub fn suspend(&self, duration: Option<Duration>, reason: Option<&str>) -> ProviderResult<()> {
        self.ensure_not_disposed("suspend")?;

        if duration.is_some() && tokio::runtime::Handle::try_current().is_err() {
            return Err(ProviderError::InvalidOperation(
                "timed suspension requires a running tokio runtime".to_string(),
            ));
        }

        let description = match reason {
            Some(reason) => format!("Suspended: {}", reason),
            None => "Suspended".to_string(),
        };

        {
            let mut cell = lock(&self.state);
            let current = cell.info.state;
            if current == ProviderState::Suspended {
                cell.info = Arc::new(ProviderStateInfo {
                    description,
                    ..(*cell.info).clone()
                });
            } else if !self.apply_transition(&mut cell, ProviderState::Suspended, description, None)
            {
                return Err(ProviderError::InvalidOperation(format!(
                    "cannot suspend provider '{}' while {}",
                    self.name, current
                )));
            }
        }

        self.arm_suspension_timer(duration);
        tracing::info!(
            provider = %self.name,
            duration_ms = duration.map(|d| d.as_millis() as u64),
            reason = reason.unwrap_or(""),
            "Provider suspended"
        );
        Ok(())
    }

    /// Resumes a suspended provider, cancelling any pending timer.
    pub fn resume(&self) -> ProviderResult<()> {
        self.ensure_not_disposed("resume")?;

        self.transition_from(ProviderState::Suspended, ProviderState::Ready, "Resumed")
            .map_err(|current| {
                ProviderError::InvalidOperation(format!(
                    "cannot resume provider '{}' while {}",
                    self.name, current
                ))
            })?;

        self.cancel_suspension_timer();
        tracing::info!(provider = %self.name, "Provider resumed");
        Ok(())
    }

    fn arm_suspension_timer(&self, duration: Option<Duration>) {
        let mut slot = lock(&self.suspension);
        if let Some(previous) = slot.take() {
            previous.token.cancel();
        }

        let Some(duration) = duration else {
            return;
        };

        let generation = self.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let engine = self.self_ref.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    if let Some(engine) = engine.upgrade() {
                        engine.auto_resume(generation);
                    }
                }
            }
        });

        *slot = Some(SuspensionTimer {
            generation,
            token,
            _handle: handle,
        });
    }

    fn auto_resume(&self, generation: u64) {
        {
            let mut slot = lock(&self.suspension);
            match slot.as_ref() {
                Some(timer) if timer.generation == generation => {
                    slot.take();
                }
                // Replaced or cancelled after the sleep finished.
                _ => return,
            }
        }

        if self.is_disposed() {
            return;
        }

        match self.transition_from(
            ProviderState::Suspended,
            ProviderState::Ready,
            "Suspension elapsed",
        ) {
            Ok(()) => tracing::info!(provider = %self.name, "Provider resumed after suspension"),
            Err(current) => tracing::debug!(
                provider = %self.name,
                state = %current,
                "Suspension elapsed but provider is no longer suspended"
            ),
        }
    }

    fn cancel_suspension_timer(&self) {
        if let Some(timer) = lock(&self.suspension).take() {
            timer.token.cancel();
        }
    }

    /// Whether an auto-resume timer is currently armed.
    pub fn has_pending_resume(&self) -> bool {
        lock(&self.suspension).is_some()
    }

    /// Waits until the provider reaches `target`, polling at the configured
    /// interval. Returns immediately if it is already there.
    pub async fn wait_for_state(&self, target: ProviderState, timeout: Duration) -> ProviderResult<()> {
        self.wait_for_state_with_cancel(target, timeout, None).await
    }

    /// Like [`wait_for_state`](Self::wait_for_state), but also stops when
    /// `cancel` fires.
    pub async fn wait_for_state_with_cancel(
        &self,
        target: ProviderState,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> ProviderResult<()> {
        if self.state() == target {
            return Ok(());
        }

        let interval = self.settings.state_poll_interval;
        let poll = async {
            loop {
                tokio::time::sleep(interval).await;
                if self.state() == target {
                    return;
                }
            }
        };
        let timed = tokio::time::timeout(timeout, poll);

        let reached = match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => {
                    return Err(ProviderError::Cancelled(format!(
                        "stopped waiting for provider '{}' to become {}",
                        self.name, target
                    )));
                }
                reached = timed => reached,
            },
            None => timed.await,
        };

        reached.map_err(|_| {
            ProviderError::Timeout(format!(
                "provider '{}' did not become {} within {:?} (currently {})",
                self.name,
                target,
                timeout,
                self.state()
            ))
        })
    }

    /// Cancels any pending suspension and makes every later operation fail
    /// fast. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_suspension_timer();
        self.semaphore.close();
        tracing::debug!(provider = %self.name, "Provider disposed");
    }

    // ------------------------------------------------------------------
    // Health, metrics and diagnostics
    // ------------------------------------------------------------------

    /// Checks provider health, delegating to the hook only while the
    /// provider can accept operations.
    pub async fn health_check(&self) -> HealthCheckResult {
        if self.is_disposed() {
            return HealthCheckResult::critical("Provider has been disposed");
        }

        let info = self.state_info();
        match info.state {
            ProviderState::Error => {
                let message = match &info.error {
                    Some(error) => format!("Provider is in error state: {}", error),
                    None => "Provider is in error state".to_string(),
                };
                return HealthCheckResult::critical(message)
                    .with_data("consecutive_failures", info.consecutive_failures.to_string());
            }
            ProviderState::Ready | ProviderState::Busy => {}
            other => {
                return HealthCheckResult::degraded(format!("Provider is {}", other))
                    .with_data("state", other.as_str());
            }
        }

        let start = Instant::now();
        let result = match AssertUnwindSafe(self.hooks.perform_health_check())
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                let error = ProviderError::from_panic("HealthCheck", payload);
                tracing::warn!(provider = %self.name, error = %error, "Health check panicked");
                lock(&self.recent_errors).push(RecordedError::new(Some("HealthCheck"), error.clone()));
                HealthCheckResult::critical(error.to_string())
            }
        };
        result.with_duration(start.elapsed())
    }

    /// Records a metric value, optionally qualified by tags.
    pub fn record_metric(&self, name: &str, value: f64, tags: Option<&BTreeMap<String, String>>) {
        let empty = BTreeMap::new();
        let key = lock(&self.metrics).set(name, value, tags.unwrap_or(&empty));

        let mut changed = HashMap::new();
        changed.insert(key, value);
        self.events.metrics_updated(MetricsUpdatedEvent {
            provider_id: self.id.clone(),
            changed,
            cleared: false,
            timestamp: Utc::now(),
        });
    }

    /// Current metric values.
    pub fn metrics(&self) -> HashMap<String, f64> {
        lock(&self.metrics).snapshot()
    }

    /// Empties the metrics map and the performance history.
    pub fn clear_metrics(&self) {
        lock(&self.metrics).clear();
        lock(&self.performance).clear();
        self.events.metrics_updated(MetricsUpdatedEvent {
            provider_id: self.id.clone(),
            changed: HashMap::new(),
            cleared: true,
            timestamp: Utc::now(),
        });
    }

    /// Snapshot of statistics with live uptime.
    pub fn statistics(&self) -> ProviderStatistics {
        lock(&self.statistics).with_uptime(Utc::now())
    }

    /// The newest `count` recorded errors, oldest first.
    pub fn recent_errors(&self, count: usize) -> Vec<RecordedError> {
        lock(&self.recent_errors).latest(count)
    }

    /// The newest `count` performance points, oldest first.
    pub fn performance_history(&self, count: usize) -> Vec<PerformanceDataPoint> {
        lock(&self.performance).latest(count)
    }

    /// Builds a point-in-time diagnostics snapshot.
    pub fn diagnostics(&self) -> ProviderDiagnostics {
        let configuration = self
            .configuration()
            .and_then(|config| serde_json::to_value(config.sanitized()).ok());

        ProviderDiagnostics {
            provider_id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            state_info: (*self.state_info()).clone(),
            configuration,
            metrics: self.metrics(),
            statistics: self.statistics(),
            recent_errors: self.recent_errors(self.settings.diagnostics_error_count),
            performance_history: self
                .performance_history(self.settings.diagnostics_performance_count),
            generated_at: Utc::now(),
        }
    }

    pub fn subscribe_state_changes(&self) -> broadcast::Receiver<StateChangedEvent> {
        self.events.subscribe_state_changes()
    }

    pub fn subscribe_operations(&self) -> broadcast::Receiver<OperationCompletedEvent> {
        self.events.subscribe_operations()
    }

    pub fn subscribe_metrics(&self) -> broadcast::Receiver<MetricsUpdatedEvent> {
        self.events.subscribe_metrics()
    }

    /// Live subscriber counts for (state, operations, metrics).
    pub fn subscriber_counts(&self) -> (usize, usize, usize) {
        self.events.subscriber_counts()
    }
}

impl<C: ProviderConfig, H: LifecycleHooks<C>> Drop for LifecycleEngine<C, H> {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.suspension).take() {
            timer.token.cancel();
        }
    }
}

#[async_trait]
impl<C: ProviderConfig, H: LifecycleHooks<C>> ManagedProvider for LifecycleEngine<C, H> {
    fn id(&self) -> &ProviderId {
        LifecycleEngine::id(self)
    }

    fn name(&self) -> &str {
        LifecycleEngine::name(self)
    }

    fn kind(&self) -> ProviderKind {
        LifecycleEngine::kind(self)
    }

    fn state(&self) -> ProviderState {
        LifecycleEngine::state(self)
    }

    fn state_info(&self) -> Arc<ProviderStateInfo> {
        LifecycleEngine::state_info(self)
    }

    fn is_healthy(&self) -> bool {
        LifecycleEngine::is_healthy(self)
    }

    fn metrics(&self) -> HashMap<String, f64> {
        LifecycleEngine::metrics(self)
    }

    fn diagnostics(&self) -> ProviderDiagnostics {
        LifecycleEngine::diagnostics(self)
    }

    async fn health_check(&self) -> HealthCheckResult {
        LifecycleEngine::health_check(self).await
    }

    async fn shutdown(&self) -> ProviderResult<()> {
        LifecycleEngine::shutdown(self).await
    }

    async fn reset(&self) -> ProviderResult<()> {
        LifecycleEngine::reset(self).await
    }

    fn suspend(&self, duration: Option<Duration>, reason: Option<&str>) -> ProviderResult<()> {
        LifecycleEngine::suspend(self, duration, reason)
    }

    fn resume(&self) -> ProviderResult<()> {
        LifecycleEngine::resume(self)
    }

    async fn wait_for_state(&self, target: ProviderState, timeout: Duration) -> ProviderResult<()> {
        LifecycleEngine::wait_for_state(self, target, timeout).await
    }

    fn subscribe_state_changes(&self) -> broadcast::Receiver<StateChangedEvent> {
        LifecycleEngine::subscribe_state_changes(self)
    }

    fn subscribe_operations(&self) -> broadcast::Receiver<OperationCompletedEvent> {
        LifecycleEngine::subscribe_operations(self)
    }

    fn subscribe_metrics(&self) -> broadcast::Receiver<MetricsUpdatedEvent> {
        LifecycleEngine::subscribe_metrics(self)
    }
}

#[async_trait]
impl<C: ProviderConfig, H: LifecycleHooks<C>> Provider for LifecycleEngine<C, H> {
    type Config = C;

    fn configuration(&self) -> Option<C> {
        LifecycleEngine::configuration(self)
    }

    async fn initialize(&self, config: C) -> ProviderResult<()> {
        LifecycleEngine::initialize(self, config).await
    }

    fn validate_configuration(&self, config: &C) -> ProviderResult<()> {
        LifecycleEngine::validate_configuration(self, config)
    }

    async fn update_configuration(&self, config: C) -> ProviderResult<()> {
        LifecycleEngine::update_configuration(self, config).await
    }
}
