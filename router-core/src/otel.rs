//! OpenTelemetry-Compatible Span Helpers
//!
//! Structured `tracing` span builders for the routing pipeline. All spans use
//! dot-notation field names compatible with OpenTelemetry semantic
//! conventions.
//!
//! # Span Hierarchy
//!
//! ```text
//! router.decide                (one per task context)
//! router.approval              (lifetime of an escalation request timer)
//! router.execute               (one per execution request)
//!   └─ router.provider_attempt (one per provider tried)
//! router.health_check          (one per provider/model probe)
//! router.budget_tick           (one per enforcer tick)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use router_core::otel;
//!
//! let span = otel::provider_attempt_span("task-7", "primary", "premium-reasoner", 1);
//! let guard = span.enter();
//! // ... invoke the provider ...
//! otel::record_attempt_result(&span, true, 1450, 2048);
//! drop(guard);
//! ```

use tracing::Span;

use crate::cost::enforcer::TickReport;
use crate::escalation::EscalationDecision;
use crate::health::ProviderHealth;
use crate::tier::ModelTier;

// ── Span Name Constants ──────────────────────────────────────────────

/// Escalation decision for one task.
pub const SPAN_DECIDE: &str = "router.decide";

/// Approval timer for one escalation request.
pub const SPAN_APPROVAL: &str = "router.approval";

/// Execution of one request across its fallback chain.
pub const SPAN_EXECUTE: &str = "router.execute";

/// A single provider attempt within an execution.
pub const SPAN_PROVIDER_ATTEMPT: &str = "router.provider_attempt";

/// Health probe of one provider/model pair.
pub const SPAN_HEALTH_CHECK: &str = "router.health_check";

/// One budget enforcer tick.
pub const SPAN_BUDGET_TICK: &str = "router.budget_tick";

// ── Field Name Constants ─────────────────────────────────────────────

pub const FIELD_TASK_ID: &str = "task.id";
pub const FIELD_REQUEST_ID: &str = "router.request.id";
pub const FIELD_TIER: &str = "router.tier";
pub const FIELD_PROVIDER: &str = "router.provider";
pub const FIELD_MODEL: &str = "router.model";
pub const FIELD_ATTEMPT: &str = "router.attempt.number";
pub const FIELD_ESCALATE: &str = "router.escalate";
pub const FIELD_SCORE: &str = "router.score";
pub const FIELD_CUTOFF: &str = "router.cutoff";
pub const FIELD_OUTCOME: &str = "router.outcome";
pub const FIELD_COST: &str = "router.cost";
pub const FIELD_SUCCESS: &str = "router.success";
pub const FIELD_DURATION_MS: &str = "router.duration_ms";
pub const FIELD_TOKENS_USED: &str = "router.tokens_used";
pub const FIELD_HEALTH_STATUS: &str = "router.health.status";
pub const FIELD_HEALTH_SCORE: &str = "router.health.score";
pub const FIELD_ALERT_COUNT: &str = "router.budget.alerts";
pub const FIELD_DAILY_SPEND: &str = "router.budget.daily_spend";

// ── Span Builders ────────────────────────────────────────────────────

/// Create a span for an escalation decision.
///
/// Fields filled later via [`record_decision`]: escalate, score, cutoff.
pub fn decide_span(task_id: &str) -> Span {
    tracing::info_span!(
        "router.decide",
        "task.id" = %task_id,
        "router.escalate" = tracing::field::Empty,
        "router.score" = tracing::field::Empty,
        "router.cutoff" = tracing::field::Empty,
    )
}

/// Record the outcome of a decision.
pub fn record_decision(span: &Span, decision: &EscalationDecision) {
    span.record("router.escalate", decision.should_escalate);
    span.record("router.score", decision.score);
    span.record("router.cutoff", decision.cutoff);
}

/// Create a span covering an escalation request's approval timer.
pub fn approval_span(request_id: &str, task_id: &str) -> Span {
    tracing::info_span!(
        "router.approval",
        "router.request.id" = %request_id,
        "task.id" = %task_id,
    )
}

/// Create a span for an execution.
///
/// Fields filled later via [`record_execution_result`]: outcome, cost, duration.
pub fn execute_span(task_id: &str, tier: ModelTier) -> Span {
    tracing::info_span!(
        "router.execute",
        "task.id" = %task_id,
        "router.tier" = %tier,
        "router.outcome" = tracing::field::Empty,
        "router.cost" = tracing::field::Empty,
        "router.duration_ms" = tracing::field::Empty,
    )
}

/// Record the result of an execution.
pub fn record_execution_result(span: &Span, outcome: &str, cost: f64, duration_ms: u64) {
    span.record("router.outcome", outcome);
    span.record("router.cost", cost);
    span.record("router.duration_ms", duration_ms);
}

/// Create a span for one provider attempt.
///
/// Fields filled later via [`record_attempt_result`]: success, duration, tokens.
pub fn provider_attempt_span(task_id: &str, provider: &str, model: &str, attempt: u32) -> Span {
    tracing::debug_span!(
        "router.provider_attempt",
        "task.id" = %task_id,
        "router.provider" = %provider,
        "router.model" = %model,
        "router.attempt.number" = attempt,
        "router.success" = tracing::field::Empty,
        "router.duration_ms" = tracing::field::Empty,
        "router.tokens_used" = tracing::field::Empty,
    )
}

/// Record the result of a provider attempt.
pub fn record_attempt_result(span: &Span, success: bool, duration_ms: u64, tokens_used: u64) {
    span.record("router.success", success);
    span.record("router.duration_ms", duration_ms);
    span.record("router.tokens_used", tokens_used);
}

/// Create a span for a health probe.
///
/// Fields filled later via [`record_health`]: status, score.
pub fn health_check_span(provider: &str, model: &str, tier: ModelTier) -> Span {
    tracing::debug_span!(
        "router.health_check",
        "router.provider" = %provider,
        "router.model" = %model,
        "router.tier" = %tier,
        "router.health.status" = tracing::field::Empty,
        "router.health.score" = tracing::field::Empty,
    )
}

/// Record a probe result.
pub fn record_health(span: &Span, health: &ProviderHealth) {
    span.record("router.health.status", health.status.to_string().as_str());
    span.record("router.health.score", health.score);
}

/// Create a span for one budget enforcer tick.
///
/// Fields filled later via [`record_budget_tick`]: alert count, daily spend.
pub fn budget_tick_span() -> Span {
    tracing::debug_span!(
        "router.budget_tick",
        "router.budget.alerts" = tracing::field::Empty,
        "router.budget.daily_spend" = tracing::field::Empty,
        "router.cutoff" = tracing::field::Empty,
    )
}

/// Record the result of an enforcer tick.
pub fn record_budget_tick(span: &Span, report: &TickReport) {
    span.record("router.budget.alerts", report.alerts.len() as u64);
    span.record("router.budget.daily_spend", report.totals.daily.cost);
    span.record("router.cutoff", report.snapshot.cutoff);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;
    use crate::cost::control::ControlSnapshot;
    use crate::escalation::EscalationEngine;

    #[test]
    fn test_span_names_use_router_prefix() {
        for name in [
            SPAN_DECIDE,
            SPAN_APPROVAL,
            SPAN_EXECUTE,
            SPAN_PROVIDER_ATTEMPT,
            SPAN_HEALTH_CHECK,
            SPAN_BUDGET_TICK,
        ] {
            assert!(name.starts_with("router."), "{name}");
        }
    }

    #[test]
    fn test_builders_accept_records_without_subscriber() {
        let decision = EscalationEngine::new()
            .decide(&TaskContext::new("t"), &ControlSnapshot::default())
            .unwrap();
        let span = decide_span("t");
        record_decision(&span, &decision);

        let span = execute_span("t", ModelTier::Premium);
        record_execution_result(&span, "success", 0.25, 1200);

        let span = provider_attempt_span("t", "primary", "m", 1);
        record_attempt_result(&span, false, 5000, 0);
    }
}
