//! Escalation criteria: A fixed, ordered list of tagged variants
//!
//! Primary criteria contribute their weight to the escalation score.
//! Fallback criteria contribute nothing; they only force escalation when the
//! primary pass falls short.

use crate::config::CriteriaConfig;
use crate::context::TaskContext;
use serde::{Deserialize, Serialize};

/// A single escalation criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Change touches many services
    MultiServiceImpact,
    /// Security impact in the critical set
    SecurityCritical,
    /// Performance multiplier above threshold
    PerformanceCritical,
    /// Architectural complexity above threshold
    ArchitecturalComplexity,
    /// Operator asked for the premium tier
    ManualOverride,
    /// Production emergency flag
    EmergencyCondition,
    /// Standard-tier output keeps failing quality review
    QualityShortfall,
}

impl Criterion {
    /// Weighted criteria, in evaluation order
    pub const PRIMARY: [Criterion; 4] = [
        Self::MultiServiceImpact,
        Self::SecurityCritical,
        Self::PerformanceCritical,
        Self::ArchitecturalComplexity,
    ];

    /// Fallback criteria, in evaluation order
    pub const FALLBACK: [Criterion; 3] = [
        Self::ManualOverride,
        Self::EmergencyCondition,
        Self::QualityShortfall,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::MultiServiceImpact => "multi_service_impact",
            Self::SecurityCritical => "security_critical",
            Self::PerformanceCritical => "performance_critical",
            Self::ArchitecturalComplexity => "architectural_complexity",
            Self::ManualOverride => "manual_override",
            Self::EmergencyCondition => "emergency_condition",
            Self::QualityShortfall => "quality_shortfall",
        }
    }

    pub fn is_fallback(&self) -> bool {
        Self::FALLBACK.contains(self)
    }

    /// Configured weight (zero for fallback criteria)
    pub fn weight(&self, config: &CriteriaConfig) -> f64 {
        match self {
            Self::MultiServiceImpact => config.weights.multi_service,
            Self::SecurityCritical => config.weights.security,
            Self::PerformanceCritical => config.weights.performance,
            Self::ArchitecturalComplexity => config.weights.complexity,
            Self::ManualOverride | Self::EmergencyCondition | Self::QualityShortfall => 0.0,
        }
    }

    /// Whether the criterion fires for this context
    pub fn is_triggered(&self, ctx: &TaskContext, config: &CriteriaConfig) -> bool {
        match self {
            Self::MultiServiceImpact => ctx.affected_services >= config.multi_service_threshold,
            Self::SecurityCritical => ctx.security_impact.is_critical(),
            Self::PerformanceCritical => {
                ctx.performance_multiplier >= config.performance_threshold
            }
            Self::ArchitecturalComplexity => ctx.complexity >= config.complexity_threshold,
            Self::ManualOverride => ctx.manual_override,
            Self::EmergencyCondition => ctx.emergency,
            Self::QualityShortfall => {
                ctx.recent_quality_failures >= config.quality_failure_threshold
            }
        }
    }

    /// Contribution to the score, `None` when the criterion does not fire
    pub fn evaluate(&self, ctx: &TaskContext, config: &CriteriaConfig) -> Option<f64> {
        if self.is_triggered(ctx, config) {
            Some(self.weight(config))
        } else {
            None
        }
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
