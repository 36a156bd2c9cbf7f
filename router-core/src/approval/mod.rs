//! Approval workflow for escalation requests
//!
//! ```text
//! pending ──▶ awaiting_primary ──30m──▶ awaiting_secondary ──60m──▶ awaiting_emergency ──15m──▶ rejected
//!    │               │                         │                            │
//!    │               └────────── approve / reject at any awaiting tier ─────┴──▶ approved | rejected
//!    │
//!    └── confidence > threshold and not security-critical ──▶ auto_approved
//! ```

pub mod state;
pub mod workflow;

pub use state::{
    transition, ApprovalEvent, ApprovalStatus, ApprovalTier, EscalationRequest, StatusChange,
};
pub use workflow::{ApprovalError, ApprovalWorkflow, NO_APPROVAL_REASON};
