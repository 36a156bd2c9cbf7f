//! Cost ledger, budget enforcer and the live control snapshot
//!
//! ```text
//! ExecutionManager ──records──▶ CostLedger ◀──reads── BudgetEnforcer
//!                                                          │
//!                                                 publish snapshot
//!                                                          ▼
//! EscalationEngine / ExecutionManager ◀──current()── ControlPlane
//! ```

pub mod control;
pub mod enforcer;
pub mod ledger;

pub use control::{ControlPlane, ControlSnapshot, SharedControlPlane};
pub use enforcer::{
    AlertSeverity, AlertType, BudgetAlert, BudgetEnforcer, CorrectiveAction, TickReport,
};
pub use ledger::{
    CostLedger, CostOutcome, CostRecord, RollingTotals, SharedCostLedger, WindowTotals,
};
