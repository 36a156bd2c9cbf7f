//! Crate-level error type
//!
//! Each module owns its error enum; [`RoutingError`] wraps them for callers
//! that go through the [`EscalationRouter`](crate::router::EscalationRouter)
//! facade.

use thiserror::Error;

use crate::approval::ApprovalError;
use crate::config::ConfigError;
use crate::context::ValidationError;
use crate::events::AuditError;
use crate::execution::{ExecutionError, ProviderError};

/// Result type alias for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("invalid task context: {0}")]
    Validation(#[from] ValidationError),

    #[error("approval: {0}")]
    Approval(#[from] ApprovalError),

    #[error("execution: {0}")]
    Execution(#[from] ExecutionError),

    #[error("provider: {0}")]
    Provider(#[from] ProviderError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("audit log: {0}")]
    Audit(#[from] AuditError),
}

impl RoutingError {
    /// Machine-readable code for logs and API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Approval(ApprovalError::NotEscalated { .. }) => "NOT_ESCALATED",
            Self::Approval(ApprovalError::AlreadyActive { .. }) => "ESCALATION_ACTIVE",
            Self::Approval(ApprovalError::NotFound(_)) => "REQUEST_NOT_FOUND",
            Self::Approval(ApprovalError::NotAnApprover { .. }) => "NOT_AN_APPROVER",
            Self::Approval(ApprovalError::Conflict { .. }) => "REQUEST_ALREADY_DECIDED",
            Self::Execution(ExecutionError::ProviderExhaustion { .. }) => "PROVIDER_EXHAUSTION",
            Self::Execution(ExecutionError::Cancelled { .. }) => "CANCELLED",
            Self::Execution(ExecutionError::RateLimited { .. }) => "RATE_LIMITED",
            Self::Provider(_) => "PROVIDER_FAILED",
            Self::Config(_) => "INVALID_CONFIG",
            Self::Audit(_) => "AUDIT_LOG_FAILED",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Execution(e) => e.is_retryable(),
            Self::Provider(e) => e.is_retryable(),
            // another request may be active for the task until it resolves
            Self::Approval(ApprovalError::AlreadyActive { .. }) => true,
            Self::Audit(AuditError::Io { source, .. }) => matches!(
                source.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Validation(_) => Some("Fix the task context fields and resubmit."),
            Self::Approval(ApprovalError::NotEscalated { .. }) => {
                Some("Only escalated decisions need approval; run the task on the standard tier.")
            }
            Self::Approval(ApprovalError::AlreadyActive { .. }) => {
                Some("Wait for the active escalation request to resolve, then retry.")
            }
            Self::Approval(ApprovalError::NotAnApprover { .. }) => {
                Some("Ask an approver configured for the request's current tier.")
            }
            Self::Execution(ExecutionError::ProviderExhaustion { .. }) => {
                Some("Every provider in the chain failed; check provider health and retry.")
            }
            Self::Execution(ExecutionError::RateLimited { .. }) => {
                Some("Spend controls are active; retry after the indicated delay.")
            }
            Self::Config(_) => Some("Check the TOML file and ROUTER_* environment overrides."),
            _ => None,
        }
    }
}
