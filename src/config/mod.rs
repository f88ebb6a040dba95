//! Configuration and settings management.
//!
//! This module provides the lifecycle engine's tunables and their JSON
//! persistence.

mod settings;

pub use settings::{LifecycleSettings, SettingsError, MAX_CONCURRENT_OPERATIONS};
