//! Escalation Engine: Deterministic decision-making for tier routing
//!
//! Scores a [`TaskContext`] against the weighted primary criteria, runs the
//! fallback pass when the score falls short, and applies the live cost
//! controls from the current [`ControlSnapshot`]. No I/O and no model calls;
//! identical inputs always produce an identical decision.

use crate::approval::EscalationRequest;
use crate::config::CriteriaConfig;
use crate::context::{TaskContext, ValidationError};
use crate::cost::control::ControlSnapshot;
use crate::escalation::criteria::Criterion;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Tolerance for comparing weighted sums against the cutoff
pub const SCORE_EPSILON: f64 = 1e-9;

/// How the engine arrived at its answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPath {
    /// Score below cutoff, no fallback matched
    BelowCutoff,
    /// Weighted score met the cutoff
    Primary,
    /// Security-critical impact forces escalation
    SecurityOverride,
    /// A fallback criterion forced escalation
    Fallback,
    /// Borderline score pushed to the standard tier by cost-saving mode
    CostSaving,
}

/// Decision produced by the Escalation Engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub task_id: String,
    /// Whether the premium tier should be used
    pub should_escalate: bool,
    /// Confidence in the decision (0.0 - 1.0)
    pub confidence_score: f64,
    /// Weighted score (raised to the fallback floor when a fallback fired)
    pub score: f64,
    /// Cutoff in force when the decision was made
    pub cutoff: f64,
    pub triggered_criteria: BTreeSet<Criterion>,
    pub path: DecisionPath,
    pub reason: String,
}

impl EscalationDecision {
    /// Triggered criterion names, in evaluation order
    pub fn triggered_names(&self) -> Vec<&'static str> {
        self.triggered_criteria.iter().map(|c| c.name()).collect()
    }

    /// Triggered criteria that carry weight
    pub fn primary_triggered(&self) -> BTreeSet<Criterion> {
        self.triggered_criteria
            .iter()
            .copied()
            .filter(|c| !c.is_fallback())
            .collect()
    }
}

/// Annotation raised by [`EscalationEngine::validate`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionWarning {
    LikelyFalsePositive { reason: String },
    LikelyFalseNegative { reason: String },
}

/// Offline review of a decision; never blocks execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionReview {
    pub task_id: String,
    pub valid: bool,
    pub warnings: Vec<DecisionWarning>,
}

/// The Escalation Engine: Weighted criteria plus fallback pass
pub struct EscalationEngine {
    config: CriteriaConfig,
    /// Primary-criteria signatures of past escalations, newest last
    escalated_patterns: Mutex<VecDeque<BTreeSet<Criterion>>>,
}

impl EscalationEngine {
    /// Create a new engine with default config
    pub fn new() -> Self {
        Self::with_config(CriteriaConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: CriteriaConfig) -> Self {
        Self {
            config,
            escalated_patterns: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &CriteriaConfig {
        &self.config
    }

    /// Score a task context and decide whether to escalate.
    ///
    /// The cutoff, cost-saving mode and escalation-rate gate come from the
    /// snapshot, so the same context may route differently once the budget
    /// enforcer tightens controls.
    pub fn decide(
        &self,
        ctx: &TaskContext,
        snapshot: &ControlSnapshot,
    ) -> Result<EscalationDecision, ValidationError> {
        ctx.validate()?;

        let cutoff = snapshot.cutoff;
        let mut triggered = BTreeSet::new();
        let mut score = 0.0;
        for criterion in Criterion::PRIMARY {
            if let Some(contribution) = criterion.evaluate(ctx, &self.config) {
                score += contribution;
                triggered.insert(criterion);
            }
        }
        let primary_score = score;
        let meets_cutoff = primary_score + SCORE_EPSILON >= cutoff;
        let security_override = triggered.contains(&Criterion::SecurityCritical);

        let mut fallback_matched = Vec::new();
        let mut suppressed = false;
        if !meets_cutoff {
            for criterion in Criterion::FALLBACK {
                if !criterion.is_triggered(ctx, &self.config) {
                    continue;
                }
                // Quality-driven escalations stop while an escalation-rate breach is in force
                if criterion == Criterion::QualityShortfall && snapshot.escalation_rate_exceeded() {
                    suppressed = true;
                    continue;
                }
                fallback_matched.push(criterion);
                triggered.insert(criterion);
            }
            if !fallback_matched.is_empty() {
                score = score.max(self.config.fallback_floor);
            }
        }

        let (mut should_escalate, mut path) = if security_override {
            (true, DecisionPath::SecurityOverride)
        } else if meets_cutoff {
            (true, DecisionPath::Primary)
        } else if !fallback_matched.is_empty() {
            (true, DecisionPath::Fallback)
        } else {
            (false, DecisionPath::BelowCutoff)
        };

        if path == DecisionPath::Primary
            && snapshot.cost_saving_mode
            && primary_score + SCORE_EPSILON < cutoff + self.config.borderline_margin
        {
            should_escalate = false;
            path = DecisionPath::CostSaving;
        }

        let n = triggered.len() as f64;
        let confidence_score = if should_escalate {
            (0.4 + 0.2 * n).min(0.95)
        } else {
            (0.95 - 0.2 * n).max(0.35)
        };

        let names = triggered.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ");
        let mut reason = match path {
            DecisionPath::SecurityOverride => format!(
                "security-critical impact ({}) overrides score {:.2}",
                ctx.security_impact, primary_score
            ),
            DecisionPath::Primary => {
                format!("score {:.2} >= cutoff {:.2} ({})", score, cutoff, names)
            }
            DecisionPath::Fallback => format!(
                "fallback criteria matched ({}); score raised to {:.2}",
                fallback_matched
                    .iter()
                    .map(|c| c.name())
                    .collect::<Vec<_>>()
                    .join(", "),
                score
            ),
            DecisionPath::CostSaving => format!(
                "cost-saving mode: borderline score {:.2} routed to standard tier",
                score
            ),
            DecisionPath::BelowCutoff => {
                format!("score {:.2} below cutoff {:.2}", score, cutoff)
            }
        };
        if suppressed {
            reason.push_str("; quality shortfall suppressed: escalation rate above ceiling");
        }

        let decision = EscalationDecision {
            task_id: ctx.task_id.clone(),
            should_escalate,
            confidence_score,
            score,
            cutoff,
            triggered_criteria: triggered,
            path,
            reason,
        };

        if decision.should_escalate {
            self.remember(decision.primary_triggered());
        }

        tracing::debug!(
            task_id = %decision.task_id,
            escalate = decision.should_escalate,
            score = decision.score,
            cutoff = decision.cutoff,
            path = ?decision.path,
            criteria = %names,
            "escalation decision"
        );

        Ok(decision)
    }

    /// Flag statistically likely false positives and false negatives.
    pub fn validate(&self, decision: &EscalationDecision) -> DecisionReview {
        let mut warnings = Vec::new();
        let primary = decision.primary_triggered();

        if decision.should_escalate {
            if primary.is_empty() && decision.path == DecisionPath::Fallback {
                warnings.push(DecisionWarning::LikelyFalsePositive {
                    reason: "escalated on fallback signals only".to_string(),
                });
            }
            if decision.path != DecisionPath::SecurityOverride && primary.len() == 1 {
                if let Some(only) = primary.iter().next() {
                    let weight = only.weight(&self.config);
                    if weight < 0.3 {
                        warnings.push(DecisionWarning::LikelyFalsePositive {
                            reason: format!(
                                "isolated low-weight trigger {} ({:.2})",
                                only, weight
                            ),
                        });
                    }
                }
            }
        } else {
            if !primary.is_empty() && self.matches_escalated_pattern(&primary) {
                warnings.push(DecisionWarning::LikelyFalseNegative {
                    reason: format!(
                        "criteria [{}] match a previously escalated pattern",
                        primary.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
                    ),
                });
            }
            let gap = decision.cutoff - decision.score;
            if decision.score > 0.0 && gap <= 0.1 + SCORE_EPSILON {
                warnings.push(DecisionWarning::LikelyFalseNegative {
                    reason: format!(
                        "score {:.2} within {:.2} of cutoff {:.2}",
                        decision.score,
                        gap.max(0.0),
                        decision.cutoff
                    ),
                });
            }
        }

        if !warnings.is_empty() {
            tracing::info!(
                task_id = %decision.task_id,
                warnings = warnings.len(),
                "decision flagged for review"
            );
        }

        DecisionReview {
            task_id: decision.task_id.clone(),
            valid: warnings.is_empty(),
            warnings,
        }
    }

    /// Review the decision carried by an escalation request
    pub fn validate_request(&self, request: &EscalationRequest) -> DecisionReview {
        self.validate(&request.decision)
    }

    fn remember(&self, signature: BTreeSet<Criterion>) {
        if signature.is_empty() || self.config.pattern_memory == 0 {
            return;
        }
        let mut patterns = self
            .escalated_patterns
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if patterns.contains(&signature) {
            return;
        }
        patterns.push_back(signature);
        while patterns.len() > self.config.pattern_memory {
            patterns.pop_front();
        }
    }

    fn matches_escalated_pattern(&self, signature: &BTreeSet<Criterion>) -> bool {
        self.escalated_patterns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(signature)
    }
}

impl Default for EscalationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SecurityImpact;

    fn relaxed() -> ControlSnapshot {
        ControlSnapshot::default()
    }

    #[test]
    fn test_documented_example_scores_point_three() {
        let engine = EscalationEngine::new();
        let ctx = TaskContext::new("t-1")
            .with_services(4)
            .with_security(SecurityImpact::None)
            .with_performance(1.0)
            .with_complexity(0.5);

        let d = engine.decide(&ctx, &relaxed()).unwrap();
        assert_eq!(d.score, 0.3);
        assert!(!d.should_escalate);
        assert_eq!(d.path, DecisionPath::BelowCutoff);
        assert_eq!(d.triggered_names(), vec!["multi_service_impact"]);
    }

    #[test]
    fn test_security_critical_always_escalates() {
        let engine = EscalationEngine::new();
        for impact in [
            SecurityImpact::SystemWide,
            SecurityImpact::DataBreach,
            SecurityImpact::AuthBypass,
        ] {
            let ctx = TaskContext::new("t-sec").with_security(impact);
            let d = engine.decide(&ctx, &relaxed()).unwrap();
            assert!(d.should_escalate, "{impact} should escalate");
            assert_eq!(d.path, DecisionPath::SecurityOverride);
            assert!((d.score - 0.4).abs() < SCORE_EPSILON);
        }
    }

    #[test]
    fn test_security_override_survives_tightening_and_cost_saving() {
        let engine = EscalationEngine::new();
        let mut snap = relaxed();
        snap.cutoff = 0.9;
        snap.cost_saving_mode = true;
        let ctx = TaskContext::new("t").with_security(SecurityImpact::AuthBypass);
        assert!(engine.decide(&ctx, &snap).unwrap().should_escalate);
    }

    #[test]
    fn test_exact_cutoff_escalates() {
        let engine = EscalationEngine::new();
        let ctx = TaskContext::new("t").with_services(3).with_performance(2.5);
        let d = engine.decide(&ctx, &relaxed()).unwrap();
        assert!(d.should_escalate);
        assert_eq!(d.path, DecisionPath::Primary);
    }

    #[test]
    fn test_determinism() {
        let engine = EscalationEngine::new();
        let ctx = TaskContext::new("t")
            .with_services(5)
            .with_complexity(0.9)
            .with_quality_failures(3);
        let a = engine.decide(&ctx, &relaxed()).unwrap();
        let b = engine.decide(&ctx.clone(), &relaxed()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fallback_forces_floor() {
        let engine = EscalationEngine::new();
        let ctx = TaskContext::new("t").with_manual_override();
        let d = engine.decide(&ctx, &relaxed()).unwrap();
        assert!(d.should_escalate);
        assert_eq!(d.path, DecisionPath::Fallback);
        assert_eq!(d.score, 0.6);
        assert!(d.triggered_criteria.contains(&Criterion::ManualOverride));
    }

    #[test]
    fn test_fallback_not_evaluated_when_primary_meets_cutoff() {
        let engine = EscalationEngine::new();
        let ctx = TaskContext::new("t")
            .with_services(3)
            .with_performance(2.0)
            .with_emergency();
        let d = engine.decide(&ctx, &relaxed()).unwrap();
        assert_eq!(d.path, DecisionPath::Primary);
        assert!(!d.triggered_criteria.contains(&Criterion::EmergencyCondition));
    }

    #[test]
    fn test_quality_shortfall_suppressed_over_rate_ceiling() {
        let engine = EscalationEngine::new();
        let ctx = TaskContext::new("t").with_quality_failures(4);

        let d = engine.decide(&ctx, &relaxed()).unwrap();
        assert!(d.should_escalate);

        let mut hot = relaxed();
        hot.escalation_rate = 0.8;
        hot.rate_breached = true;
        let d = engine.decide(&ctx, &hot).unwrap();
        assert!(!d.should_escalate);
        assert!(d.reason.contains("suppressed"));

        // emergency is never suppressed
        let d = engine.decide(&ctx.with_emergency(), &hot).unwrap();
        assert!(d.should_escalate);
    }

    #[test]
    fn test_raised_cutoff_blocks_borderline() {
        let engine = EscalationEngine::new();
        let ctx = TaskContext::new("t").with_services(3).with_performance(2.0);
        let mut snap = relaxed();
        snap.cutoff = 0.6;
        let d = engine.decide(&ctx, &snap).unwrap();
        assert!(!d.should_escalate);
        assert_eq!(d.cutoff, 0.6);
    }

    #[test]
    fn test_cost_saving_mode_downgrades_borderline_only() {
        let engine = EscalationEngine::with_config(CriteriaConfig {
            borderline_margin: 0.05,
            ..CriteriaConfig::default()
        });
        let mut snap = relaxed();
        snap.cost_saving_mode = true;

        let borderline = TaskContext::new("t").with_services(3).with_performance(2.0);
        let d = engine.decide(&borderline, &snap).unwrap();
        assert!(!d.should_escalate);
        assert_eq!(d.path, DecisionPath::CostSaving);

        let strong = TaskContext::new("t2")
            .with_services(3)
            .with_performance(2.0)
            .with_complexity(0.8);
        let d = engine.decide(&strong, &snap).unwrap();
        assert!(d.should_escalate);
    }

    #[test]
    fn test_confidence_grows_with_signals() {
        let engine = EscalationEngine::new();
        let two = TaskContext::new("a").with_services(3).with_performance(2.0);
        let three = two.clone().with_complexity(0.9);
        let c2 = engine.decide(&two, &relaxed()).unwrap().confidence_score;
        let c3 = engine.decide(&three, &relaxed()).unwrap().confidence_score;
        assert!(c3 > c2);
        assert!(c3 <= 0.95);
    }

    #[test]
    fn test_invalid_context_rejected() {
        let engine = EscalationEngine::new();
        let ctx = TaskContext::new("t").with_complexity(-0.1);
        assert!(engine.decide(&ctx, &relaxed()).is_err());
    }

    #[test]
    fn test_validate_flags_fallback_only_escalation() {
        let engine = EscalationEngine::new();
        let d = engine
            .decide(&TaskContext::new("t").with_emergency(), &relaxed())
            .unwrap();
        let review = engine.validate(&d);
        assert!(!review.valid);
        assert!(matches!(
            review.warnings[0],
            DecisionWarning::LikelyFalsePositive { .. }
        ));
    }

    #[test]
    fn test_validate_flags_isolated_low_weight_trigger() {
        let engine = EscalationEngine::new();
        let ctx = TaskContext::new("t").with_performance(3.0).with_manual_override();
        let d = engine.decide(&ctx, &relaxed()).unwrap();
        let review = engine.validate(&d);
        assert!(review
            .warnings
            .iter()
            .any(|w| matches!(w, DecisionWarning::LikelyFalsePositive { reason } if reason.contains("performance_critical"))));
    }

    #[test]
    fn test_validate_flags_pattern_near_miss() {
        let engine = EscalationEngine::new();
        let ctx = TaskContext::new("t").with_services(3).with_performance(2.0);
        let escalated = engine.decide(&ctx, &relaxed()).unwrap();
        assert!(escalated.should_escalate);
        assert!(engine.validate(&escalated).valid);

        let mut tight = relaxed();
        tight.cutoff = 0.7;
        let missed = engine.decide(&ctx, &tight).unwrap();
        assert!(!missed.should_escalate);
        let review = engine.validate(&missed);
        assert!(review
            .warnings
            .iter()
            .any(|w| matches!(w, DecisionWarning::LikelyFalseNegative { reason } if reason.contains("previously escalated"))));
    }

    #[test]
    fn test_validate_clean_standard_decision() {
        let engine = EscalationEngine::new();
        let d = engine.decide(&TaskContext::new("t"), &relaxed()).unwrap();
        assert!(engine.validate(&d).valid);
    }
}
