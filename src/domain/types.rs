//! Core identifier types for supervised providers.
//!
//! Newtype wrappers keep provider identifiers from being mixed up with
//! operation names or metric keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a supervised provider instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    /// Generates a fresh identifier with the given prefix, e.g. `mail-<uuid>`.
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{}-{}", prefix, uuid::Uuid::new_v4()))
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProviderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// The kind of external integration a provider wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Mail account (Gmail API, IMAP).
    Mail,
    /// Language-model API.
    Llm,
    /// Local encrypted storage.
    Storage,
    /// Contacts source.
    Contacts,
    /// Anything else plugged into the lifecycle engine.
    Custom,
}

impl ProviderKind {
    /// Returns the string representation used in logs and metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Mail => "mail",
            ProviderKind::Llm => "llm",
            ProviderKind::Storage => "storage",
            ProviderKind::Contacts => "contacts",
            ProviderKind::Custom => "custom",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let a = ProviderId::generate("mail");
        let b = ProviderId::generate("mail");

        assert!(a.0.starts_with("mail-"));
        assert_ne!(a, b);
    }

    #[test]
    fn provider_kind_serialization() {
        let json = serde_json::to_string(&ProviderKind::Llm).unwrap();
        assert_eq!(json, "\"llm\"");

        let kind: ProviderKind = serde_json::from_str("\"contacts\"").unwrap();
        assert_eq!(kind, ProviderKind::Contacts);
        assert_eq!(kind.as_str(), "contacts");
    }
}
