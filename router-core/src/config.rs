//! Router configuration
//!
//! Loaded from an optional TOML file, then overridden from the environment,
//! then validated. Every section has working defaults so an empty file (or no
//! file at all) yields a runnable configuration.
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |---|---|
//! | `ROUTER_DAILY_BUDGET` | `budget.daily_budget` |
//! | `ROUTER_MONTHLY_BUDGET` | `budget.monthly_budget` |
//! | `ROUTER_ESCALATION_RATE_CEILING` | `budget.escalation_rate_ceiling` |
//! | `ROUTER_BUDGET_TICK_SECS` | `budget.tick_secs` |
//! | `ROUTER_AUTO_APPROVE_THRESHOLD` | `approval.auto_approve_threshold` |
//! | `ROUTER_ATTEMPT_TIMEOUT_MS` | `execution.attempt_timeout_ms` |
//! | `ROUTER_AUDIT_LOG` | `audit.path` |

use crate::approval::state::ApprovalTier;
use crate::tier::ModelTier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Weights of the primary criteria
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriteriaWeights {
    pub multi_service: f64,
    pub security: f64,
    pub performance: f64,
    pub complexity: f64,
}

impl Default for CriteriaWeights {
    fn default() -> Self {
        Self {
            multi_service: 0.3,
            security: 0.4,
            performance: 0.2,
            complexity: 0.1,
        }
    }
}

/// Decision engine thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriteriaConfig {
    /// Affected services at or above this count trigger multi-service impact
    pub multi_service_threshold: u32,
    /// Performance multiplier at or above this triggers performance-critical
    pub performance_threshold: f64,
    /// Complexity at or above this triggers architectural complexity
    pub complexity_threshold: f64,
    /// Recent quality failures at or above this trigger the shortfall fallback
    pub quality_failure_threshold: u32,
    /// Base escalation cutoff (the enforcer may raise it)
    pub cutoff: f64,
    /// Score floor applied when a fallback criterion matches
    pub fallback_floor: f64,
    /// Width of the borderline band above the cutoff used by cost-saving mode
    pub borderline_margin: f64,
    /// Escalated signatures remembered for false-negative review
    pub pattern_memory: usize,
    pub weights: CriteriaWeights,
}

impl Default for CriteriaConfig {
    fn default() -> Self {
        Self {
            multi_service_threshold: 3,
            performance_threshold: 2.0,
            complexity_threshold: 0.7,
            quality_failure_threshold: 2,
            cutoff: 0.5,
            fallback_floor: 0.6,
            borderline_margin: 0.15,
            pattern_memory: 256,
            weights: CriteriaWeights::default(),
        }
    }
}

/// Approval tiers, approver sets and timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Confidence above which non-security tasks skip human approval
    pub auto_approve_threshold: f64,
    pub primary_timeout_secs: u64,
    pub secondary_timeout_secs: u64,
    pub emergency_timeout_secs: u64,
    pub primary_approvers: Vec<String>,
    pub secondary_approvers: Vec<String>,
    pub emergency_approvers: Vec<String>,
    /// How long resolved requests stay queryable before they are pruned
    pub resolved_retention_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            auto_approve_threshold: 0.85,
            primary_timeout_secs: 30 * 60,
            secondary_timeout_secs: 60 * 60,
            emergency_timeout_secs: 15 * 60,
            primary_approvers: vec!["tech-lead".to_string()],
            secondary_approvers: vec!["engineering-manager".to_string()],
            emergency_approvers: vec!["on-call".to_string()],
            resolved_retention_secs: 60 * 60,
        }
    }
}

impl ApprovalConfig {
    /// Timeout of the given approver tier
    pub fn timeout_for(&self, tier: ApprovalTier) -> Duration {
        match tier {
            ApprovalTier::Primary => Duration::from_secs(self.primary_timeout_secs),
            ApprovalTier::Secondary => Duration::from_secs(self.secondary_timeout_secs),
            ApprovalTier::Emergency => Duration::from_secs(self.emergency_timeout_secs),
        }
    }

    /// Retention window for resolved requests
    pub fn resolved_retention(&self) -> Duration {
        Duration::from_secs(self.resolved_retention_secs)
    }

    /// Approver set of the given tier
    pub fn approvers(&self, tier: ApprovalTier) -> &[String] {
        match tier {
            ApprovalTier::Primary => &self.primary_approvers,
            ApprovalTier::Secondary => &self.secondary_approvers,
            ApprovalTier::Emergency => &self.emergency_approvers,
        }
    }
}

/// Model and ordered provider chain for one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRoute {
    pub model: String,
    /// Primary provider first, then fallbacks in order
    pub providers: Vec<String>,
}

/// Result quality thresholds applied to premium output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Minimum non-whitespace characters for a complete answer
    pub min_chars: usize,
    /// Minimum combined quality score (0.0 - 1.0)
    pub min_score: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_chars: 40,
            min_score: 0.6,
        }
    }
}

/// Per-model token pricing, in budget currency per 1000 tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPricing {
    pub fn cost(&self, tokens_in: u64, tokens_out: u64) -> f64 {
        (tokens_in as f64 * self.input_per_1k + tokens_out as f64 * self.output_per_1k) / 1000.0
    }
}

/// Execution manager settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub standard: TierRoute,
    pub premium: TierRoute,
    /// Upper bound for a single provider attempt
    pub attempt_timeout_ms: u64,
    pub quality: QualityConfig,
    /// Requests per minute allowed while rate limiting is active
    pub rate_limit_per_minute: u32,
    /// Consecutive failures before a provider's circuit opens
    pub breaker_failure_threshold: u32,
    /// Seconds an open circuit stays open before a probe request
    pub breaker_cooldown_secs: u64,
    /// Completion token cap sent to HTTP providers
    pub max_tokens: u32,
    /// Model id → pricing used to cost HTTP provider responses
    pub pricing: BTreeMap<String, ModelPricing>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            standard: TierRoute {
                model: "standard-coder".to_string(),
                providers: vec!["primary".to_string(), "secondary".to_string()],
            },
            premium: TierRoute {
                model: "premium-reasoner".to_string(),
                providers: vec!["primary".to_string(), "secondary".to_string()],
            },
            attempt_timeout_ms: 120_000,
            quality: QualityConfig::default(),
            rate_limit_per_minute: 30,
            breaker_failure_threshold: 3,
            breaker_cooldown_secs: 60,
            max_tokens: 2048,
            pricing: BTreeMap::from([
                (
                    "standard-coder".to_string(),
                    ModelPricing {
                        input_per_1k: 0.0005,
                        output_per_1k: 0.0015,
                    },
                ),
                (
                    "premium-reasoner".to_string(),
                    ModelPricing {
                        input_per_1k: 0.01,
                        output_per_1k: 0.03,
                    },
                ),
            ]),
        }
    }
}

impl ExecutionConfig {
    /// Route for the given tier
    pub fn route(&self, tier: ModelTier) -> &TierRoute {
        match tier {
            ModelTier::Standard => &self.standard,
            ModelTier::Premium => &self.premium,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Pricing for a model; unpriced models cost nothing
    pub fn pricing_for(&self, model: &str) -> ModelPricing {
        self.pricing.get(model).copied().unwrap_or_default()
    }
}

/// Provider health monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub standard_interval_secs: u64,
    pub premium_interval_secs: u64,
    /// Per-probe timeout, independent of the check interval
    pub probe_timeout_ms: u64,
    /// Provider id → base URL used by the HTTP probe
    pub endpoints: BTreeMap<String, String>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            standard_interval_secs: 30,
            premium_interval_secs: 60,
            probe_timeout_ms: 5_000,
            endpoints: BTreeMap::new(),
        }
    }
}

impl HealthConfig {
    /// Check interval for pairs serving the given tier
    pub fn interval_for(&self, tier: ModelTier) -> Duration {
        match tier {
            ModelTier::Standard => Duration::from_secs(self.standard_interval_secs),
            ModelTier::Premium => Duration::from_secs(self.premium_interval_secs),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Budget enforcer thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub daily_budget: f64,
    pub monthly_budget: f64,
    /// Escalated / total decisions above which the cutoff is tightened
    pub escalation_rate_ceiling: f64,
    /// Trailing window for the escalation rate
    pub escalation_window_secs: u64,
    /// Decisions required before the escalation rate is trusted
    pub min_decisions_for_rate: u64,
    /// Amount added to the cutoff while the rate ceiling is breached
    pub tighten_step: f64,
    /// Fraction of the daily budget that raises an early warning
    pub warn_fraction: f64,
    pub tick_secs: u64,
    /// Alert history ring buffer capacity
    pub alert_history: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_budget: 50.0,
            monthly_budget: 1_000.0,
            escalation_rate_ceiling: 0.3,
            escalation_window_secs: 24 * 60 * 60,
            min_decisions_for_rate: 10,
            tighten_step: 0.1,
            warn_fraction: 0.8,
            tick_secs: 60,
            alert_history: 100,
        }
    }
}

impl BudgetConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn escalation_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.escalation_window_secs as i64)
    }
}

/// Write-behind audit log settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// JSONL file to append audit entries to (disabled when unset)
    pub path: Option<PathBuf>,
}

/// Top-level router configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub criteria: CriteriaConfig,
    pub approval: ApprovalConfig,
    pub execution: ExecutionConfig,
    pub health: HealthConfig,
    pub budget: BudgetConfig,
    pub audit: AuditConfig,
}

impl RouterConfig {
    /// Load from an optional TOML file, apply environment overrides, validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|source| ConfigError::Io {
                    path: p.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Override fields from `ROUTER_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("ROUTER_DAILY_BUDGET") {
            self.budget.daily_budget = v;
        }
        if let Some(v) = env_parse("ROUTER_MONTHLY_BUDGET") {
            self.budget.monthly_budget = v;
        }
        if let Some(v) = env_parse("ROUTER_ESCALATION_RATE_CEILING") {
            self.budget.escalation_rate_ceiling = v;
        }
        if let Some(v) = env_parse("ROUTER_BUDGET_TICK_SECS") {
            self.budget.tick_secs = v;
        }
        if let Some(v) = env_parse("ROUTER_AUTO_APPROVE_THRESHOLD") {
            self.approval.auto_approve_threshold = v;
        }
        if let Some(v) = env_parse("ROUTER_ATTEMPT_TIMEOUT_MS") {
            self.execution.attempt_timeout_ms = v;
        }
        if let Ok(path) = std::env::var("ROUTER_AUDIT_LOG") {
            if !path.is_empty() {
                self.audit.path = Some(PathBuf::from(path));
            }
        }
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!(
                    "{} must be within 0.0..=1.0, got {}",
                    name, v
                )))
            }
        };
        unit("criteria.cutoff", self.criteria.cutoff)?;
        unit("criteria.fallback_floor", self.criteria.fallback_floor)?;
        unit("criteria.complexity_threshold", self.criteria.complexity_threshold)?;
        unit("approval.auto_approve_threshold", self.approval.auto_approve_threshold)?;
        unit("execution.quality.min_score", self.execution.quality.min_score)?;
        unit("budget.escalation_rate_ceiling", self.budget.escalation_rate_ceiling)?;
        unit("budget.warn_fraction", self.budget.warn_fraction)?;

        for tier in ModelTier::all() {
            let route = self.execution.route(*tier);
            if route.model.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} tier has no model", tier)));
            }
            if route.providers.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{} tier has an empty provider chain",
                    tier
                )));
            }
        }
        for tier in ApprovalTier::all() {
            if self.approval.approvers(*tier).is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{} approval tier has no approvers",
                    tier
                )));
            }
        }
        for (model, pricing) in &self.execution.pricing {
            if !(pricing.input_per_1k >= 0.0 && pricing.output_per_1k >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "pricing for {} must be non-negative",
                    model
                )));
            }
        }
        if self.budget.daily_budget <= 0.0 || self.budget.monthly_budget <= 0.0 {
            return Err(ConfigError::Invalid(
                "budgets must be positive".to_string(),
            ));
        }
        if self.budget.tick_secs == 0 || self.health.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick and probe timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
