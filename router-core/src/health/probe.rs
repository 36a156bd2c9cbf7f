//! Provider probes
//!
//! [`ProviderProbe`] is the seam between the monitor and the outside world.
//! [`HttpProbe`] talks to OpenAI-compatible endpoints: `GET /health` for
//! connectivity, `x-ratelimit-*` response headers for headroom, and
//! `GET /models` for model availability.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use super::ProbeReport;

/// Header carrying remaining requests in the current rate-limit window
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining-requests";
/// Header carrying the request limit of the rate-limit window
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit-requests";

/// Probe failures
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("no endpoint configured for {0}")]
    NoEndpoint(String),

    #[error("{0}")]
    Request(#[from] reqwest::Error),

    #[error("non-success status {0}")]
    Status(StatusCode),

    #[error("{0}")]
    Unavailable(String),
}

/// Checks one provider/model pair
#[async_trait]
pub trait ProviderProbe: Send + Sync {
    /// Whether the provider answers at all
    async fn connectivity(&self, provider: &str) -> Result<(), ProbeError>;

    /// Remaining fraction of the provider's rate-limit window (0.0 - 1.0)
    async fn rate_limit_headroom(&self, provider: &str) -> Result<f64, ProbeError>;

    /// Whether the provider currently serves the model
    async fn model_available(&self, provider: &str, model: &str) -> Result<bool, ProbeError>;

    /// Run all three checks and fold them into a report
    async fn probe(&self, provider: &str, model: &str) -> ProbeReport {
        let mut error = None;
        let mut note = |e: String| {
            if error.is_none() {
                error = Some(e);
            }
        };

        let connectivity = match self.connectivity(provider).await {
            Ok(()) => 1.0,
            Err(e) => {
                note(format!("connectivity: {}", e));
                0.0
            }
        };
        let rate_limit_headroom = match self.rate_limit_headroom(provider).await {
            Ok(h) => h,
            Err(e) => {
                note(format!("rate limit: {}", e));
                0.0
            }
        };
        let model_available = match self.model_available(provider, model).await {
            Ok(true) => 1.0,
            Ok(false) => {
                note(format!("model {} not listed", model));
                0.0
            }
            Err(e) => {
                note(format!("models: {}", e));
                0.0
            }
        };

        ProbeReport {
            connectivity,
            rate_limit_headroom,
            model_available,
            error,
            timed_out: false,
        }
    }
}

/// HTTP probe against OpenAI-compatible endpoints
pub struct HttpProbe {
    client: reqwest::Client,
    /// provider id → base URL
    endpoints: BTreeMap<String, String>,
}

impl HttpProbe {
    pub fn new(
        endpoints: BTreeMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(ProbeError::Client)?;
        Ok(Self { client, endpoints })
    }

    fn base(&self, provider: &str) -> Result<&str, ProbeError> {
        self.endpoints
            .get(provider)
            .map(|b| b.trim_end_matches('/'))
            .ok_or_else(|| ProbeError::NoEndpoint(provider.to_string()))
    }

    async fn get(&self, provider: &str, path: &str) -> Result<reqwest::Response, ProbeError> {
        let url = format!("{}{}", self.base(provider)?, path);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(ProbeError::Status(resp.status()));
        }
        Ok(resp)
    }
}

/// Remaining / limit from rate-limit headers; full headroom when absent
pub(crate) fn headroom_from_headers(headers: &HeaderMap) -> f64 {
    let read = |name: &str| -> Option<f64> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
    };
    match (read(RATE_LIMIT_REMAINING_HEADER), read(RATE_LIMIT_LIMIT_HEADER)) {
        (Some(remaining), Some(limit)) if limit > 0.0 => (remaining / limit).clamp(0.0, 1.0),
        _ => 1.0,
    }
}

/// Whether a `/models` listing contains the model
pub(crate) fn listing_contains(listing: &serde_json::Value, model: &str) -> bool {
    let entries = listing
        .get("data")
        .or_else(|| listing.get("models"))
        .and_then(|v| v.as_array());
    let Some(entries) = entries else {
        return false;
    };
    entries.iter().any(|entry| match entry {
        serde_json::Value::String(id) => id == model,
        other => ["id", "name", "model"]
            .iter()
            .filter_map(|key| other.get(*key).and_then(|v| v.as_str()))
            .any(|id| id == model),
    })
}

#[async_trait]
impl ProviderProbe for HttpProbe {
    async fn connectivity(&self, provider: &str) -> Result<(), ProbeError> {
        let resp = self.get(provider, "/health").await?;
        // Read body to ensure server is fully responsive, not just accepting connections
        resp.bytes().await?;
        Ok(())
    }

    async fn rate_limit_headroom(&self, provider: &str) -> Result<f64, ProbeError> {
        let resp = self.get(provider, "/models").await?;
        Ok(headroom_from_headers(resp.headers()))
    }

    async fn model_available(&self, provider: &str, model: &str) -> Result<bool, ProbeError> {
        let listing: serde_json::Value = self
            .get(provider, "/models")
            .await?
            .json()
            .await?;
        Ok(listing_contains(&listing, model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_headroom_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(headroom_from_headers(&headers), 1.0);

        headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from_static("25"));
        headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from_static("100"));
        assert!((headroom_from_headers(&headers) - 0.25).abs() < 1e-9);

        headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from_static("0"));
        assert_eq!(headroom_from_headers(&headers), 1.0);
    }

    #[test]
    fn test_listing_formats() {
        let openai = json!({"data": [{"id": "premium-reasoner"}, {"id": "other"}]});
        assert!(listing_contains(&openai, "premium-reasoner"));
        assert!(!listing_contains(&openai, "missing"));

        let plain = json!({"models": ["standard-coder"]});
        assert!(listing_contains(&plain, "standard-coder"));

        let named = json!({"models": [{"name": "standard-coder"}]});
        assert!(listing_contains(&named, "standard-coder"));

        assert!(!listing_contains(&json!({}), "standard-coder"));
    }

    #[tokio::test]
    async fn test_unknown_provider_fails_every_check() {
        let probe = HttpProbe::new(BTreeMap::new(), Duration::from_secs(1)).unwrap();
        assert!(matches!(
            probe.connectivity("ghost").await,
            Err(ProbeError::NoEndpoint(ref p)) if p == "ghost"
        ));
        let report = probe.probe("ghost", "m").await;
        assert_eq!(report.score(), 0.0);
        assert!(report
            .error
            .as_deref()
            .unwrap()
            .contains("no endpoint configured for ghost"));
    }

    struct FixedProbe {
        up: bool,
        headroom: f64,
        models: Vec<&'static str>,
    }

    #[async_trait]
    impl ProviderProbe for FixedProbe {
        async fn connectivity(&self, _provider: &str) -> Result<(), ProbeError> {
            if self.up {
                Ok(())
            } else {
                Err(ProbeError::Unavailable("connection refused".into()))
            }
        }

        async fn rate_limit_headroom(&self, _provider: &str) -> Result<f64, ProbeError> {
            Ok(self.headroom)
        }

        async fn model_available(&self, _provider: &str, model: &str) -> Result<bool, ProbeError> {
            Ok(self.models.contains(&model))
        }
    }

    #[tokio::test]
    async fn test_default_probe_folds_checks() {
        let probe = FixedProbe {
            up: true,
            headroom: 0.5,
            models: vec!["m"],
        };
        let report = probe.probe("p", "m").await;
        assert!((report.score() - 0.85).abs() < 1e-9);
        assert!(report.error.is_none());

        let report = probe.probe("p", "absent").await;
        assert_eq!(report.model_available, 0.0);
        assert!(report.error.unwrap().contains("not listed"));

        let down = FixedProbe {
            up: false,
            headroom: 1.0,
            models: vec!["m"],
        };
        let report = down.probe("p", "m").await;
        assert!(report.error.unwrap().starts_with("connectivity"));
    }
}
