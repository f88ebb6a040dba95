//! Provider contract and lifecycle engine.
//!
//! Every external integration (mail account, language model, encrypted
//! storage, contacts) is supervised by a [`LifecycleEngine`]:
//!
//! - [`LifecycleHooks`] - business logic a concrete provider plugs in
//! - [`ManagedProvider`] / [`Provider`] - what hosts call
//! - [`ProviderConfig`] - statically typed configuration contract
//! - [`ProviderError`] - error taxonomy shared by all providers
//!
//! # Architecture
//!
//! ```text
//! Host (startup, dashboard)
//!          |
//!          v
//!   LifecycleEngine  -- events -->  subscribers
//!          |
//!          v
//!   LifecycleHooks (Gmail, LLM, storage, contacts)
//! ```

mod config;
mod error;
mod events;
mod lifecycle;
mod metrics;
mod traits;

pub use config::{BaseProviderConfig, ProviderConfig, REDACTED};
pub use error::{ProviderError, ProviderResult, RecordedError};
pub use events::{MetricsUpdatedEvent, OperationCompletedEvent, StateChangedEvent};
pub use lifecycle::{
    LifecycleEngine, OPERATIONS_FAILED_METRIC, OPERATIONS_TOTAL_METRIC,
    OPERATION_DURATION_METRIC,
};
pub use metrics::{metric_key, MetricsMap, RingBuffer};
pub use traits::{LifecycleHooks, ManagedProvider, Provider};
