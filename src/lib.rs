//! heap-lifecycle - Provider lifecycle and health supervision
//!
//! This crate supervises the external integrations The Heap depends on
//! (mail account, language model, encrypted storage, contacts): their state
//! machine, bounded-concurrency operation execution, health checks,
//! suspension and diagnostics.

pub mod config;
pub mod domain;
pub mod providers;
pub mod services;

pub use providers::{LifecycleEngine, LifecycleHooks, ManagedProvider, Provider};
