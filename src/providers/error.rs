//! Error taxonomy shared by every supervised provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result type alias for provider lifecycle operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Errors surfaced by the lifecycle engine and by concrete providers.
///
/// Errors are `Clone` so the engine can keep them in the state snapshot and
/// in the recent-error buffer while also returning them to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProviderError {
    /// Configuration is missing or failed validation during initialization.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A value failed a validation rule.
    #[error("validation error: {0}")]
    Validation(String),

    /// The operation is not allowed in the provider's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The operation did not finish in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The caller stopped waiting.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Expected business failure reported by a concrete provider.
    #[error("provider error: {0}")]
    Provider(String),

    /// Unanticipated fault caught inside the engine.
    #[error("unexpected failure in {operation}: {message}")]
    Unexpected {
        /// Operation that faulted.
        operation: String,
        /// Panic payload or wrapped message.
        message: String,
    },
}

impl ProviderError {
    /// Wraps a panic payload caught while running `operation`.
    pub(crate) fn from_panic(operation: &str, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };

        ProviderError::Unexpected {
            operation: operation.to_string(),
            message,
        }
    }

    /// Returns a short, stable name for the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Configuration(_) => "configuration",
            ProviderError::Validation(_) => "validation",
            ProviderError::InvalidOperation(_) => "invalid_operation",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::Cancelled(_) => "cancelled",
            ProviderError::Provider(_) => "provider",
            ProviderError::Unexpected { .. } => "unexpected",
        }
    }

    /// Whether this error represents a fault rather than an expected failure.
    pub fn is_fault(&self) -> bool {
        matches!(self, ProviderError::Unexpected { .. })
    }
}

/// An error captured in the provider's recent-error history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedError {
    /// When the error was recorded.
    pub timestamp: DateTime<Utc>,
    /// Operation that produced the error, if any.
    pub operation: Option<String>,
    /// The error itself.
    pub error: ProviderError,
}

impl RecordedError {
    /// Creates a record stamped with the current time.
    pub fn new(operation: Option<&str>, error: ProviderError) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: operation.map(str::to_string),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_wrapped() {
        let err = ProviderError::from_panic("FetchMessages", Box::new("boom"));
        assert_eq!(
            err,
            ProviderError::Unexpected {
                operation: "FetchMessages".to_string(),
                message: "boom".to_string(),
            }
        );
        assert!(err.is_fault());

        let err = ProviderError::from_panic("Sync", Box::new(String::from("owned")));
        assert!(err.to_string().contains("owned"));

        let err = ProviderError::from_panic("Sync", Box::new(42_u8));
        assert!(err.to_string().contains("unknown panic"));
    }

    #[test]
    fn error_kinds() {
        assert_eq!(ProviderError::Timeout("t".into()).kind(), "timeout");
        assert_eq!(
            ProviderError::InvalidOperation("x".into()).kind(),
            "invalid_operation"
        );
        assert!(!ProviderError::Provider("rate limited".into()).is_fault());
    }

    #[test]
    fn error_serialization() {
        let err = ProviderError::Configuration("missing endpoint".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"kind\":\"configuration\""));

        let back: ProviderError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
