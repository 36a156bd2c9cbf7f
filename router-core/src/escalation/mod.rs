//! Escalation Engine: Deterministic Tier Routing Decisions
//!
//! Decides whether a task goes to the premium tier. A pure function of the
//! task context, the criterion weights and the current control snapshot;
//! no model calls and no I/O.
//!
//! # Decision Flow
//!
//! ```text
//! TaskContext
//!     │
//!     ├─ validate() ── malformed → ValidationError
//!     │
//!     ▼
//! Primary pass (weighted)
//!     │  multi_service_impact 0.3 · security_critical 0.4
//!     │  performance_critical 0.2 · architectural_complexity 0.1
//!     │
//!     ├─ security_critical → escalate (override)
//!     ├─ score ≥ cutoff → escalate
//!     │      └─ cost-saving mode and borderline → standard
//!     │
//!     ▼
//! Fallback pass (score < cutoff)
//!     │  manual_override · emergency_condition · quality_shortfall
//!     │
//!     ├─ any match → score = max(score, 0.6), escalate
//!     └─ none → standard
//! ```

pub mod criteria;
pub mod engine;

pub use criteria::Criterion;
pub use engine::{
    DecisionPath, DecisionReview, DecisionWarning, EscalationDecision, EscalationEngine,
    SCORE_EPSILON,
};
