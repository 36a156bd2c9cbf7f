//! Task Context: The attribute bag a caller submits for routing
//!
//! The task-management layer owns these records; the core only reads them.
//! All scoring in the decision engine is numeric over these fields.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Blast radius of a task on the security posture of the system
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityImpact {
    #[default]
    None,
    Limited,
    SystemWide,
    DataBreach,
    AuthBypass,
}

impl SecurityImpact {
    /// Whether this impact category belongs to the critical set
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::SystemWide | Self::DataBreach | Self::AuthBypass)
    }
}

impl std::fmt::Display for SecurityImpact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Limited => write!(f, "limited"),
            Self::SystemWide => write!(f, "system_wide"),
            Self::DataBreach => write!(f, "data_breach"),
            Self::AuthBypass => write!(f, "auth_bypass"),
        }
    }
}

/// Malformed task context, rejected before any decisioning
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("task id must not be empty")]
    EmptyTaskId,

    #[error("performance multiplier must be a finite value >= 1.0, got {0}")]
    InvalidPerformanceMultiplier(f64),

    #[error("complexity score must be within 0.0..=1.0, got {0}")]
    InvalidComplexity(f64),
}

/// Caller-supplied description of a unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Identifier assigned by the task-management layer
    pub task_id: String,
    /// Number of services the change touches
    pub affected_services: u32,
    /// Security impact category
    pub security_impact: SecurityImpact,
    /// Performance requirement multiplier (1.0 = baseline)
    pub performance_multiplier: f64,
    /// Architectural complexity score (0.0 - 1.0)
    pub complexity: f64,
    /// Operator explicitly asked for the premium tier
    #[serde(default)]
    pub manual_override: bool,
    /// Production emergency in progress
    #[serde(default)]
    pub emergency: bool,
    /// Recent standard-tier results for this task that failed quality review
    #[serde(default)]
    pub recent_quality_failures: u32,
    /// Free-form attributes, carried through untouched
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl TaskContext {
    /// Baseline context: one service, no security impact, no performance or
    /// complexity pressure.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            affected_services: 1,
            security_impact: SecurityImpact::None,
            performance_multiplier: 1.0,
            complexity: 0.0,
            manual_override: false,
            emergency: false,
            recent_quality_failures: 0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_services(mut self, count: u32) -> Self {
        self.affected_services = count;
        self
    }

    pub fn with_security(mut self, impact: SecurityImpact) -> Self {
        self.security_impact = impact;
        self
    }

    pub fn with_performance(mut self, multiplier: f64) -> Self {
        self.performance_multiplier = multiplier;
        self
    }

    pub fn with_complexity(mut self, score: f64) -> Self {
        self.complexity = score;
        self
    }

    pub fn with_manual_override(mut self) -> Self {
        self.manual_override = true;
        self
    }

    pub fn with_emergency(mut self) -> Self {
        self.emergency = true;
        self
    }

    pub fn with_quality_failures(mut self, count: u32) -> Self {
        self.recent_quality_failures = count;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Reject contexts the engine cannot score
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.task_id.trim().is_empty() {
            return Err(ValidationError::EmptyTaskId);
        }
        if !self.performance_multiplier.is_finite() || self.performance_multiplier < 1.0 {
            return Err(ValidationError::InvalidPerformanceMultiplier(
                self.performance_multiplier,
            ));
        }
        if !self.complexity.is_finite() || !(0.0..=1.0).contains(&self.complexity) {
            return Err(ValidationError::InvalidComplexity(self.complexity));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_context_is_valid() {
        let ctx = TaskContext::new("task-1");
        assert!(ctx.validate().is_ok());
        assert_eq!(ctx.affected_services, 1);
        assert_eq!(ctx.security_impact, SecurityImpact::None);
    }

    #[test]
    fn test_rejects_empty_task_id() {
        let ctx = TaskContext::new("   ");
        assert_eq!(ctx.validate(), Err(ValidationError::EmptyTaskId));
    }

    #[test]
    fn test_rejects_bad_multiplier() {
        let ctx = TaskContext::new("t").with_performance(0.5);
        assert!(matches!(
            ctx.validate(),
            Err(ValidationError::InvalidPerformanceMultiplier(_))
        ));

        let ctx = TaskContext::new("t").with_performance(f64::NAN);
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_complexity() {
        let ctx = TaskContext::new("t").with_complexity(1.2);
        assert_eq!(ctx.validate(), Err(ValidationError::InvalidComplexity(1.2)));

        let ctx = TaskContext::new("t").with_complexity(f64::INFINITY);
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn test_critical_security_set() {
        assert!(!SecurityImpact::None.is_critical());
        assert!(!SecurityImpact::Limited.is_critical());
        assert!(SecurityImpact::SystemWide.is_critical());
        assert!(SecurityImpact::DataBreach.is_critical());
        assert!(SecurityImpact::AuthBypass.is_critical());
    }

    #[test]
    fn test_context_deserializes_with_defaults() {
        let json = r#"{
            "task_id": "t-9",
            "affected_services": 2,
            "security_impact": "data_breach",
            "performance_multiplier": 1.5,
            "complexity": 0.4
        }"#;
        let ctx: TaskContext = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.security_impact, SecurityImpact::DataBreach);
        assert!(!ctx.manual_override);
        assert!(ctx.metadata.is_empty());
    }
}
