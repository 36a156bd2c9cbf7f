//! Escalation & Routing Core
//!
//! Decides whether a coding task needs the expensive premium model tier, gates
//! premium use behind a multi-tier human approval workflow, executes against
//! provider chains with health-aware fallback, and closes the loop with a cost
//! ledger whose budget enforcer tightens routing thresholds as spend grows.
//!
//! # Modules
//!
//! - `escalation`: weighted criteria, the decision engine and decision review
//! - `approval`: escalation request state machine and timed approver tiers
//! - `execution`: provider adapters, fallback chains, quality fallback
//! - `health`: periodic provider probes and the shared health table
//! - `cost`: cost ledger, budget enforcer and the live control snapshot
//! - `events`: broadcast event feed and JSONL audit log
//! - `router`: [`EscalationRouter`] facade wiring everything together
//!
//! # Usage
//!
//! ```bash
//! # Run the daemon with a config file
//! router-daemon --config router.toml
//!
//! # Tighten the daily budget for one run
//! ROUTER_DAILY_BUDGET=25 router-daemon
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod approval;
pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod escalation;
pub mod events;
pub mod execution;
pub mod health;
pub mod otel;
pub mod router;
pub mod tier;

pub use approval::{
    ApprovalError, ApprovalEvent, ApprovalStatus, ApprovalTier, ApprovalWorkflow,
    EscalationRequest,
};
pub use config::{ConfigError, RouterConfig};
pub use context::{SecurityImpact, TaskContext, ValidationError};
pub use cost::{
    BudgetAlert, BudgetEnforcer, ControlPlane, ControlSnapshot, CostLedger, CostOutcome,
    CostRecord, RollingTotals,
};
pub use error::{RoutingError, RoutingResult};
pub use escalation::{Criterion, DecisionReview, EscalationDecision, EscalationEngine};
pub use events::{AuditEntry, AuditLog, EventBus, RouterEvent};
pub use execution::{
    ExecutionError, ExecutionManager, ExecutionOutcome, ExecutionRequest, ExecutionResult,
    HttpAdapter, ProviderAdapter, ProviderError, ProviderRegistry, ProviderResponse,
};
pub use health::{HealthMonitor, HealthStatus, HealthTable, ProviderHealth, ProviderProbe};
pub use router::{EscalationRouter, RoutedExecution, RouterBuilder, RoutingOutcome};
pub use tier::ModelTier;
