//! Control snapshot: Live thresholds published by the budget enforcer
//!
//! The enforcer rebuilds an immutable [`ControlSnapshot`] every tick and swaps
//! it in through a `watch` channel. Readers take the current `Arc` and never
//! wait on the enforcer.

use crate::config::{BudgetConfig, CriteriaConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Immutable view of the cost-control state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSnapshot {
    /// Escalation cutoff currently in force
    pub cutoff: f64,
    /// Whether the execution manager applies request-rate limiting
    pub rate_limiting: bool,
    /// Whether borderline escalations are forced to the standard tier
    pub cost_saving_mode: bool,
    /// Escalation rate observed at the last tick
    pub escalation_rate: f64,
    /// Ceiling the escalation rate is compared against
    pub escalation_rate_ceiling: f64,
    /// Set only when the enforcer raised an escalation-rate breach this tick
    #[serde(default)]
    pub rate_breached: bool,
    /// Monotonic publication counter
    pub generation: u64,
}

impl ControlSnapshot {
    /// Relaxed state derived from static configuration only
    pub fn baseline(criteria: &CriteriaConfig, budget: &BudgetConfig) -> Self {
        Self {
            cutoff: criteria.cutoff,
            rate_limiting: false,
            cost_saving_mode: false,
            escalation_rate: 0.0,
            escalation_rate_ceiling: budget.escalation_rate_ceiling,
            rate_breached: false,
            generation: 0,
        }
    }

    /// Whether the enforcer currently holds an escalation-rate breach
    ///
    /// A raw rate above the ceiling is not enough: the enforcer only breaches
    /// once the window holds its minimum number of decisions.
    pub fn escalation_rate_exceeded(&self) -> bool {
        self.rate_breached
    }

    /// Whether any corrective action is in force
    pub fn is_tightened(&self, base_cutoff: f64) -> bool {
        self.rate_limiting || self.cost_saving_mode || self.cutoff > base_cutoff
    }
}

impl Default for ControlSnapshot {
    fn default() -> Self {
        Self::baseline(&CriteriaConfig::default(), &BudgetConfig::default())
    }
}

/// Shared reference to the control plane
pub type SharedControlPlane = Arc<ControlPlane>;

/// Single-writer, many-reader holder of the current snapshot
pub struct ControlPlane {
    sender: watch::Sender<Arc<ControlSnapshot>>,
}

impl ControlPlane {
    pub fn new(initial: ControlSnapshot) -> Self {
        let (sender, _) = watch::channel(Arc::new(initial));
        Self { sender }
    }

    pub fn shared(self) -> SharedControlPlane {
        Arc::new(self)
    }

    /// Current snapshot (cheap `Arc` clone)
    pub fn current(&self) -> Arc<ControlSnapshot> {
        self.sender.borrow().clone()
    }

    /// Swap in a new snapshot, returning the previous one
    pub fn publish(&self, snapshot: ControlSnapshot) -> Arc<ControlSnapshot> {
        self.sender.send_replace(Arc::new(snapshot))
    }

    /// Receiver notified on every publication
    pub fn subscribe(&self) -> watch::Receiver<Arc<ControlSnapshot>> {
        self.sender.subscribe()
    }
}

impl Default for ControlPlane {
    fn default() -> Self {
        Self::new(ControlSnapshot::default())
    }
}
