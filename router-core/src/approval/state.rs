//! Approval state: The escalation request record and its transition table

use crate::context::TaskContext;
use crate::escalation::EscalationDecision;
use crate::tier::ModelTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Approver tiers, consulted in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalTier {
    Primary,
    Secondary,
    Emergency,
}

impl ApprovalTier {
    pub fn all() -> &'static [ApprovalTier] {
        &[Self::Primary, Self::Secondary, Self::Emergency]
    }

    /// Status a request holds while waiting on this tier
    pub fn awaiting_status(&self) -> ApprovalStatus {
        match self {
            Self::Primary => ApprovalStatus::AwaitingPrimary,
            Self::Secondary => ApprovalStatus::AwaitingSecondary,
            Self::Emergency => ApprovalStatus::AwaitingEmergency,
        }
    }
}

impl std::fmt::Display for ApprovalTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

/// Lifecycle of an escalation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    AwaitingPrimary,
    AwaitingSecondary,
    AwaitingEmergency,
    Approved,
    Rejected,
    AutoApproved,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::AutoApproved)
    }

    /// Approver tier the request is waiting on, if any
    pub fn awaiting_tier(&self) -> Option<ApprovalTier> {
        match self {
            Self::AwaitingPrimary => Some(ApprovalTier::Primary),
            Self::AwaitingSecondary => Some(ApprovalTier::Secondary),
            Self::AwaitingEmergency => Some(ApprovalTier::Emergency),
            _ => None,
        }
    }

    /// Model tier implied by a terminal status
    pub fn resolved_tier(&self) -> Option<ModelTier> {
        match self {
            Self::Approved | Self::AutoApproved => Some(ModelTier::Premium),
            Self::Rejected => Some(ModelTier::Standard),
            _ => None,
        }
    }

    /// Position in the lifecycle; transitions only move forward
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::AwaitingPrimary => 1,
            Self::AwaitingSecondary => 2,
            Self::AwaitingEmergency => 3,
            Self::Approved | Self::Rejected | Self::AutoApproved => 4,
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::AwaitingPrimary => write!(f, "awaiting_primary"),
            Self::AwaitingSecondary => write!(f, "awaiting_secondary"),
            Self::AwaitingEmergency => write!(f, "awaiting_emergency"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::AutoApproved => write!(f, "auto_approved"),
        }
    }
}

/// Inputs to the approval state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ApprovalEvent {
    Submit { auto_approve: bool },
    Timeout,
    Approve,
    Reject,
}

/// Transition table. `None` means the event does not apply in this state.
pub fn transition(state: ApprovalStatus, event: ApprovalEvent) -> Option<ApprovalStatus> {
    use ApprovalEvent as E;
    use ApprovalStatus as S;

    match (state, event) {
        (S::Pending, E::Submit { auto_approve: true }) => Some(S::AutoApproved),
        (S::Pending, E::Submit { auto_approve: false }) => Some(S::AwaitingPrimary),
        (S::AwaitingPrimary, E::Timeout) => Some(S::AwaitingSecondary),
        (S::AwaitingSecondary, E::Timeout) => Some(S::AwaitingEmergency),
        (S::AwaitingEmergency, E::Timeout) => Some(S::Rejected),
        (S::AwaitingPrimary | S::AwaitingSecondary | S::AwaitingEmergency, E::Approve) => {
            Some(S::Approved)
        }
        (S::AwaitingPrimary | S::AwaitingSecondary | S::AwaitingEmergency, E::Reject) => {
            Some(S::Rejected)
        }
        _ => None,
    }
}

/// One applied transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: ApprovalStatus,
    pub to: ApprovalStatus,
    pub event: ApprovalEvent,
    pub at: DateTime<Utc>,
}

/// A positive decision awaiting (or past) human approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub id: Uuid,
    pub task_context: TaskContext,
    pub decision: EscalationDecision,
    pub status: ApprovalStatus,
    /// Approver tier currently responsible, `None` once terminal
    pub current_tier: Option<ApprovalTier>,
    pub created_at: DateTime<Utc>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_reason: Option<String>,
    #[serde(default)]
    pub history: Vec<StatusChange>,
}

impl EscalationRequest {
    pub fn new(task_context: TaskContext, decision: EscalationDecision) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_context,
            decision,
            status: ApprovalStatus::Pending,
            current_tier: None,
            created_at: Utc::now(),
            decided_by: None,
            decided_at: None,
            decision_reason: None,
            history: Vec::new(),
        }
    }

    /// Apply an event, returning the new status when it was accepted
    pub fn apply(&mut self, event: ApprovalEvent, at: DateTime<Utc>) -> Option<ApprovalStatus> {
        let next = transition(self.status, event)?;
        self.history.push(StatusChange {
            from: self.status,
            to: next,
            event,
            at,
        });
        self.status = next;
        self.current_tier = next.awaiting_tier();
        Some(next)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Tier the task should run on, once the request is resolved
    pub fn resolved_tier(&self) -> Option<ModelTier> {
        self.status.resolved_tier()
    }
}
