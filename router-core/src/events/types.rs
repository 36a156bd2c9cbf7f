//! Event types for the router event feed
//!
//! Every component publishes here: decisions, approval status changes,
//! execution outcomes, provider health snapshots, budget alerts and control
//! snapshot swaps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approval::ApprovalStatus;
use crate::cost::control::ControlSnapshot;
use crate::cost::enforcer::BudgetAlert;
use crate::cost::ledger::CostRecord;
use crate::escalation::EscalationDecision;
use crate::health::ProviderHealth;

/// All router events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouterEvent {
    /// The decision engine scored a task
    DecisionMade {
        decision: EscalationDecision,
        timestamp: DateTime<Utc>,
    },

    /// An escalation request moved through the approval state machine
    ApprovalStatusChanged {
        request_id: Uuid,
        task_id: String,
        from: ApprovalStatus,
        to: ApprovalStatus,
        timestamp: DateTime<Utc>,
    },

    /// An execution finished (any outcome) and was written to the ledger
    ExecutionRecorded {
        record: CostRecord,
        attempted: Vec<String>,
    },

    /// A provider/model pair was re-scored
    ProviderHealthUpdated { health: ProviderHealth },

    /// The budget enforcer raised an alert
    BudgetAlertRaised { alert: BudgetAlert },

    /// A new control snapshot was published
    ControlsUpdated {
        snapshot: ControlSnapshot,
        timestamp: DateTime<Utc>,
    },
}

impl RouterEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::DecisionMade { .. } => "decision_made",
            Self::ApprovalStatusChanged { .. } => "approval_status_changed",
            Self::ExecutionRecorded { .. } => "execution_recorded",
            Self::ProviderHealthUpdated { .. } => "provider_health_updated",
            Self::BudgetAlertRaised { .. } => "budget_alert_raised",
            Self::ControlsUpdated { .. } => "controls_updated",
        }
    }

    /// Task the event concerns, if any
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::DecisionMade { decision, .. } => Some(&decision.task_id),
            Self::ApprovalStatusChanged { task_id, .. } => Some(task_id),
            Self::ExecutionRecorded { record, .. } => Some(&record.task_id),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::DecisionMade { timestamp, .. }
            | Self::ApprovalStatusChanged { timestamp, .. }
            | Self::ControlsUpdated { timestamp, .. } => *timestamp,
            Self::ExecutionRecorded { record, .. } => record.timestamp,
            Self::ProviderHealthUpdated { health } => health.last_checked_at,
            Self::BudgetAlertRaised { alert } => alert.raised_at,
        }
    }
}
