//! Provider adapter contract and registry
//!
//! Each provider is reached through a [`ProviderAdapter`] that takes a model
//! id and an opaque JSON payload and returns the result with its usage.
//! [`super::http::HttpAdapter`] covers OpenAI-compatible endpoints; anything
//! else plugs in through the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// What a provider returned for one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub output: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
}

impl ProviderResponse {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            tokens_in: 0,
            tokens_out: 0,
            cost: 0.0,
        }
    }

    pub fn with_usage(mut self, tokens_in: u64, tokens_out: u64, cost: f64) -> Self {
        self.tokens_in = tokens_in;
        self.tokens_out = tokens_out;
        self.cost = cost;
        self
    }

    pub fn tokens(&self) -> u64 {
        self.tokens_in + self.tokens_out
    }
}

/// Why a single provider attempt failed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("no adapter registered for provider {0}")]
    Unregistered(String),

    #[error("provider call failed: {0}")]
    Failed(String),
}

impl ProviderError {
    /// Every provider failure is worth trying the next provider for
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Unregistered(_))
    }
}

/// Uniform invoke contract for one provider
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider id as named in the tier routes
    fn id(&self) -> &str;

    async fn invoke(
        &self,
        model: &str,
        payload: &serde_json::Value,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// Adapters keyed by provider id
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own id, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) -> &mut Self {
        self.adapters.insert(adapter.id().to_string(), adapter);
        self
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider).cloned()
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.adapters.contains_key(provider)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(&'static str);

    #[async_trait]
    impl ProviderAdapter for Echo {
        fn id(&self) -> &str {
            self.0
        }

        async fn invoke(
            &self,
            model: &str,
            _payload: &serde_json::Value,
        ) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse::new(format!("{}:{}", self.0, model)).with_usage(3, 4, 0.01))
        }
    }

    #[tokio::test]
    async fn test_registry_lookup_by_id() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(Echo("secondary")))
            .with(Arc::new(Echo("primary")));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec!["primary", "secondary"]);
        assert!(registry.get("tertiary").is_none());

        let adapter = registry.get("primary").unwrap();
        let resp = adapter.invoke("m", &serde_json::json!({})).await.unwrap();
        assert_eq!(resp.output, "primary:m");
        assert_eq!(resp.tokens(), 7);
    }

    #[test]
    fn test_error_retryability() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ProviderError::RateLimited.is_retryable());
        assert!(ProviderError::Failed("502".into()).is_retryable());
        assert!(!ProviderError::Unregistered("x".into()).is_retryable());
    }
}
