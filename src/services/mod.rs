//! Host-side services.
//!
//! Services sit between the application and the supervised providers:
//!
//! ```text
//! Application Layer (startup, status dashboard)
//!          |
//!          v
//!    Services Layer  <-- You are here
//!          |
//!          v
//!  Providers (LifecycleEngine per integration)
//! ```
//!
//! - [`ProviderRegistry`]: fans lifecycle calls out across every provider and
//!   aggregates their health

mod registry;

pub use registry::{HealthReport, ProviderHealth, ProviderRegistry, RegistryError};
