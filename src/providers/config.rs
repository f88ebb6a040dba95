//! Provider configuration contract.
//!
//! Configurations expose the fields the engine checks by name instead of
//! being inspected at runtime. The provider-specific ruleset lives in
//! [`ProviderConfig::validate`] and secret redaction in
//! [`ProviderConfig::sanitized`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ProviderError, ProviderResult};

/// Placeholder written over secrets in sanitized configurations.
pub const REDACTED: &str = "***";

/// Configuration accepted by a supervised provider.
pub trait ProviderConfig: Clone + Serialize + Send + Sync + 'static {
    /// Provider-defined validation ruleset.
    fn validate(&self) -> ProviderResult<()>;

    /// Copy with every secret redacted, safe for diagnostics.
    fn sanitized(&self) -> Self;

    /// Per-operation timeout, if the provider has one.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Remote endpoint, if the provider talks to one.
    fn endpoint(&self) -> Option<&str> {
        None
    }

    /// API key or token, if the provider needs one.
    fn api_key(&self) -> Option<&str> {
        None
    }
}

/// Checks the named fields every configuration may expose.
pub(crate) fn validate_common<C: ProviderConfig>(config: &C) -> ProviderResult<()> {
    if let Some(timeout) = config.timeout() {
        if timeout.is_zero() {
            return Err(ProviderError::Configuration(
                "timeout must be greater than zero".to_string(),
            ));
        }
    }

    if let Some(endpoint) = config.endpoint() {
        let parsed = url::Url::parse(endpoint).map_err(|e| {
            ProviderError::Configuration(format!("invalid endpoint '{}': {}", endpoint, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https" | "imap" | "imaps" | "file") {
            return Err(ProviderError::Configuration(format!(
                "unsupported endpoint scheme '{}'",
                parsed.scheme()
            )));
        }
    }

    if let Some(key) = config.api_key() {
        if key.trim().is_empty() {
            return Err(ProviderError::Configuration(
                "api key must not be blank".to_string(),
            ));
        }
    }

    Ok(())
}

/// General-purpose configuration for providers without special needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseProviderConfig {
    /// Display name of the provider instance.
    pub name: String,
    /// Whether the provider should be started.
    pub enabled: bool,
    /// Per-operation timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Remote endpoint URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// API key or access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Retries a provider may attempt per call.
    pub max_retries: u32,
}

impl BaseProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            timeout: None,
            endpoint: None,
            api_key: None,
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

impl ProviderConfig for BaseProviderConfig {
    fn validate(&self) -> ProviderResult<()> {
        if self.name.trim().is_empty() {
            return Err(ProviderError::Validation(
                "provider name must not be empty".to_string(),
            ));
        }
        if self.max_retries > 10 {
            return Err(ProviderError::Validation(format!(
                "max_retries {} exceeds limit of 10",
                self.max_retries
            )));
        }
        Ok(())
    }

    fn sanitized(&self) -> Self {
        Self {
            api_key: self.api_key.as_ref().map(|_| REDACTED.to_string()),
            ..self.clone()
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_config_validation() {
        assert!(BaseProviderConfig::new("gmail").validate().is_ok());

        let unnamed = BaseProviderConfig::new("  ");
        assert!(matches!(
            unnamed.validate(),
            Err(ProviderError::Validation(_))
        ));

        let greedy = BaseProviderConfig::new("llm").with_max_retries(50);
        assert!(greedy.validate().is_err());
    }

    #[test]
    fn sanitized_copy_redacts_api_key() {
        let config = BaseProviderConfig::new("anthropic")
            .with_endpoint("https://api.anthropic.com")
            .with_api_key("sk-ant-secret");

        let clean = config.sanitized();
        assert_eq!(clean.api_key.as_deref(), Some(REDACTED));
        assert_eq!(clean.endpoint, config.endpoint);

        let json = serde_json::to_string(&clean).unwrap();
        assert!(!json.contains("sk-ant-secret"));
    }

    #[test]
    fn common_validation_checks_named_fields() {
        let ok = BaseProviderConfig::new("ollama")
            .with_endpoint("http://localhost:11434")
            .with_timeout(Duration::from_secs(30));
        assert!(validate_common(&ok).is_ok());

        let zero_timeout = BaseProviderConfig::new("x").with_timeout(Duration::ZERO);
        assert!(matches!(
            validate_common(&zero_timeout),
            Err(ProviderError::Configuration(_))
        ));

        let bad_url = BaseProviderConfig::new("x").with_endpoint("not a url");
        assert!(validate_common(&bad_url).is_err());

        let bad_scheme = BaseProviderConfig::new("x").with_endpoint("ftp://example.com");
        assert!(validate_common(&bad_scheme).is_err());

        let blank_key = BaseProviderConfig::new("x").with_api_key("   ");
        assert!(validate_common(&blank_key).is_err());
    }
}
