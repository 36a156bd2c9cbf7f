//! Circuit breaker and fallback chain for provider routing.
//!
//! The circuit breaker tracks consecutive failures per provider. When
//! failures reach a configurable threshold the circuit *opens* and the
//! provider is temporarily skipped. After a cooldown the circuit enters
//! *half-open* state and one request probes recovery.
//!
//! The [`FallbackChain`] turns a tier's ordered provider list into an
//! [`AttemptPlan`]: unhealthy and open-circuit providers are dropped,
//! degraded ones move behind the usable ones, order is otherwise kept.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::health::{HealthStatus, HealthTable};

/// Circuit breaker state for a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests allowed.
    Closed,
    /// Tripped; requests blocked until cooldown expires.
    Open,
    /// Cooldown expired; one probe request allowed.
    HalfOpen,
}

/// Per-provider circuit breaker tracking consecutive failures.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    consecutive_failures: HashMap<String, u32>,
    last_failure: HashMap<String, Instant>,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time after the last failure before Open → HalfOpen.
    pub cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            consecutive_failures: HashMap::new(),
            last_failure: HashMap::new(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    /// Record a success; resets the circuit to Closed.
    pub fn record_success(&mut self, provider: &str) {
        self.consecutive_failures.remove(provider);
        self.last_failure.remove(provider);
    }

    /// Record a failure; may trip the circuit to Open.
    pub fn record_failure(&mut self, provider: &str) {
        let count = self
            .consecutive_failures
            .entry(provider.to_string())
            .or_insert(0);
        *count += 1;
        self.last_failure
            .insert(provider.to_string(), Instant::now());
    }

    pub fn state(&self, provider: &str) -> CircuitState {
        if self.failure_count(provider) < self.failure_threshold {
            return CircuitState::Closed;
        }
        match self.last_failure.get(provider) {
            Some(last) if last.elapsed() < self.cooldown => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    /// Whether the provider may be attempted (Closed or HalfOpen).
    pub fn is_available(&self, provider: &str) -> bool {
        !matches!(self.state(provider), CircuitState::Open)
    }

    pub fn failure_count(&self, provider: &str) -> u32 {
        self.consecutive_failures.get(provider).copied().unwrap_or(0)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

/// Why a provider was left out of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Unhealthy,
    CircuitOpen,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::CircuitOpen => write!(f, "circuit open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedProvider {
    pub provider: String,
    pub reason: SkipReason,
}

/// Providers to attempt, in order, for one model
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptPlan {
    pub order: Vec<String>,
    pub skipped: Vec<SkippedProvider>,
}

impl AttemptPlan {
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl IntoIterator for AttemptPlan {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.into_iter()
    }
}

/// Ordered provider chain for one model.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    model: String,
    providers: Vec<String>,
}

impl FallbackChain {
    /// Create a chain from an ordered list of providers, primary first.
    pub fn new(model: impl Into<String>, providers: Vec<String>) -> Self {
        Self {
            model: model.into(),
            providers,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    /// Usable providers in attempt order
    pub fn plan(&self, health: &HealthTable, breaker: &CircuitBreaker) -> AttemptPlan {
        let mut plan = AttemptPlan::default();
        let mut degraded = Vec::new();
        for provider in &self.providers {
            let status = health.status_of(provider, &self.model);
            if status == HealthStatus::Unhealthy {
                plan.skipped.push(SkippedProvider {
                    provider: provider.clone(),
                    reason: SkipReason::Unhealthy,
                });
            } else if !breaker.is_available(provider) {
                plan.skipped.push(SkippedProvider {
                    provider: provider.clone(),
                    reason: SkipReason::CircuitOpen,
                });
            } else if status == HealthStatus::Degraded {
                degraded.push(provider.clone());
            } else {
                plan.order.push(provider.clone());
            }
        }
        plan.order.extend(degraded);
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{ProbeReport, ProviderHealth};
    use crate::tier::ModelTier;
    use chrono::Utc;

    fn chain() -> FallbackChain {
        FallbackChain::new(
            "m",
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
        )
    }

    fn set(table: &HealthTable, provider: &str, connectivity: f64, headroom: f64, available: f64) {
        let report = ProbeReport {
            connectivity,
            rate_limit_headroom: headroom,
            model_available: available,
            error: None,
            timed_out: false,
        };
        table.update(ProviderHealth::from_report(
            provider,
            "m",
            ModelTier::Standard,
            &report,
            Utc::now(),
        ));
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state("a"), CircuitState::Closed);
        assert!(cb.is_available("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_after_threshold() {
        let mut cb = CircuitBreaker::new(2, Duration::from_secs(9999));
        cb.record_failure("a");
        assert_eq!(cb.state("a"), CircuitState::Closed);
        cb.record_failure("a");
        assert_eq!(cb.state("a"), CircuitState::Open);
        assert!(!cb.is_available("a"));
        assert!(cb.is_available("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_circuit() {
        let mut cb = CircuitBreaker::new(2, Duration::from_secs(9999));
        cb.record_failure("a");
        cb.record_failure("a");
        assert_eq!(cb.state("a"), CircuitState::Open);
        cb.record_success("a");
        assert_eq!(cb.state("a"), CircuitState::Closed);
        assert_eq!(cb.failure_count("a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_cooldown() {
        let mut cb = CircuitBreaker::new(1, Duration::from_secs(60));
        cb.record_failure("a");
        assert_eq!(cb.state("a"), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cb.state("a"), CircuitState::HalfOpen);
        assert!(cb.is_available("a"));
    }

    #[test]
    fn test_plan_keeps_order_when_all_healthy() {
        let plan = chain().plan(&HealthTable::new(), &CircuitBreaker::default());
        assert_eq!(plan.order, vec!["a", "b", "c"]);
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn test_plan_skips_unhealthy() {
        let table = HealthTable::new();
        set(&table, "a", 0.0, 0.0, 0.0);
        let plan = chain().plan(&table, &CircuitBreaker::default());
        assert_eq!(plan.order, vec!["b", "c"]);
        assert_eq!(
            plan.skipped,
            vec![SkippedProvider {
                provider: "a".to_string(),
                reason: SkipReason::Unhealthy,
            }]
        );
    }

    #[test]
    fn test_plan_moves_degraded_last() {
        let table = HealthTable::new();
        // reachable and serving the model, but out of headroom: 0.7
        set(&table, "a", 1.0, 0.0, 1.0);
        set(&table, "b", 1.0, 0.0, 1.0);
        let plan = chain().plan(&table, &CircuitBreaker::default());
        assert_eq!(plan.order, vec!["c", "a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_skips_open_circuit() {
        let mut cb = CircuitBreaker::new(1, Duration::from_secs(9999));
        cb.record_failure("b");
        let plan = chain().plan(&HealthTable::new(), &cb);
        assert_eq!(plan.order, vec!["a", "c"]);
        assert_eq!(plan.skipped[0].reason, SkipReason::CircuitOpen);
    }

    #[test]
    fn test_plan_all_unhealthy_is_empty() {
        let table = HealthTable::new();
        for p in ["a", "b", "c"] {
            set(&table, p, 0.0, 1.0, 0.0);
        }
        let plan = chain().plan(&table, &CircuitBreaker::default());
        assert!(plan.is_empty());
        assert_eq!(plan.skipped.len(), 3);
        assert_eq!(plan.into_iter().count(), 0);
    }
}
