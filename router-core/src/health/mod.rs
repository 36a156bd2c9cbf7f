//! Provider health: Scores, the shared health table and check counters
//!
//! The monitor writes one [`ProviderHealth`] per provider/model pair each
//! check; the execution manager reads the table when planning a fallback
//! chain. Health is advisory: it reorders and skips providers, it never
//! fails a request on its own.

pub mod monitor;
pub mod probe;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::tier::ModelTier;

pub use monitor::{HealthMonitor, ProbeTarget};
pub use probe::{HttpProbe, ProbeError, ProviderProbe};

/// Weight of the connectivity probe in the health score
pub const CONNECTIVITY_WEIGHT: f64 = 0.4;
/// Weight of rate-limit headroom in the health score
pub const HEADROOM_WEIGHT: f64 = 0.3;
/// Weight of the model-availability probe in the health score
pub const AVAILABILITY_WEIGHT: f64 = 0.3;

/// Health state of a provider/model pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// healthy above 0.8, degraded from 0.5 to 0.8, unhealthy below 0.5
    pub fn from_score(score: f64) -> Self {
        if score > 0.8 {
            Self::Healthy
        } else if score >= 0.5 {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }

    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Unhealthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Raw probe results, each component in 0.0 - 1.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub connectivity: f64,
    pub rate_limit_headroom: f64,
    pub model_available: f64,
    /// First error seen while probing
    pub error: Option<String>,
    pub timed_out: bool,
}

impl ProbeReport {
    /// Report for a probe that produced nothing usable
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            connectivity: 0.0,
            rate_limit_headroom: 0.0,
            model_available: 0.0,
            error: Some(error.into()),
            timed_out: false,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Self::failed("probe timed out")
        }
    }

    pub fn score(&self) -> f64 {
        let clamp = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        CONNECTIVITY_WEIGHT * clamp(self.connectivity)
            + HEADROOM_WEIGHT * clamp(self.rate_limit_headroom)
            + AVAILABILITY_WEIGHT * clamp(self.model_available)
    }
}

/// Latest health of one provider/model pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub model_id: String,
    pub tier: ModelTier,
    pub score: f64,
    pub status: HealthStatus,
    pub last_checked_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl ProviderHealth {
    pub fn from_report(
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
        tier: ModelTier,
        report: &ProbeReport,
        at: DateTime<Utc>,
    ) -> Self {
        let score = report.score();
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            tier,
            score,
            status: HealthStatus::from_score(score),
            last_checked_at: at,
            last_error: report.error.clone(),
        }
    }
}

/// Shared reference to the health table
pub type SharedHealthTable = Arc<HealthTable>;

/// Latest health per provider/model pair
#[derive(Debug, Default)]
pub struct HealthTable {
    entries: RwLock<HashMap<(String, String), ProviderHealth>>,
}

impl HealthTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedHealthTable {
        Arc::new(self)
    }

    /// Replace the entry for the pair, returning the previous one
    pub fn update(&self, health: ProviderHealth) -> Option<ProviderHealth> {
        let key = (health.provider_id.clone(), health.model_id.clone());
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, health)
    }

    pub fn get(&self, provider: &str, model: &str) -> Option<ProviderHealth> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(provider.to_string(), model.to_string()))
            .cloned()
    }

    /// Status of a pair; pairs never probed count as healthy
    pub fn status_of(&self, provider: &str, model: &str) -> HealthStatus {
        self.get(provider, model)
            .map(|h| h.status)
            .unwrap_or(HealthStatus::Healthy)
    }

    /// All entries ordered by provider then model
    pub fn snapshot(&self) -> Vec<ProviderHealth> {
        let mut all: Vec<ProviderHealth> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| {
            (a.provider_id.as_str(), a.model_id.as_str())
                .cmp(&(b.provider_id.as_str(), b.model_id.as_str()))
        });
        all
    }
}

/// Health check counters
#[derive(Debug, Default)]
pub struct HealthCheckMetrics {
    healthy: AtomicU64,
    degraded: AtomicU64,
    unhealthy: AtomicU64,
    timeouts: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckMetricsSnapshot {
    pub healthy: u64,
    pub degraded: u64,
    pub unhealthy: u64,
    pub timeouts: u64,
    pub errors: u64,
}

impl HealthCheckMetrics {
    pub(crate) fn record(&self, health: &ProviderHealth, report: &ProbeReport) {
        match health.status {
            HealthStatus::Healthy => self.healthy.fetch_add(1, Ordering::Relaxed),
            HealthStatus::Degraded => self.degraded.fetch_add(1, Ordering::Relaxed),
            HealthStatus::Unhealthy => self.unhealthy.fetch_add(1, Ordering::Relaxed),
        };
        if report.timed_out {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        } else if report.error.is_some() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> HealthCheckMetricsSnapshot {
        HealthCheckMetricsSnapshot {
            healthy: self.healthy.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            unhealthy: self.unhealthy.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
