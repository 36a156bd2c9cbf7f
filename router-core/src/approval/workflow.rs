//! Approval workflow: Drives escalation requests through the approver tiers
//!
//! Each active request owns a timer task and a cancellation token. The timer
//! sleeps for the current tier's timeout and then feeds a `Timeout` event into
//! the transition table; an approver decision cancels it. Status changes are
//! broadcast through a per-request `watch` channel so callers can await
//! resolution without polling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::state::{ApprovalEvent, ApprovalStatus, ApprovalTier, EscalationRequest};
use crate::config::ApprovalConfig;
use crate::context::TaskContext;
use crate::escalation::EscalationDecision;
use crate::events::{AuditEntry, AuditLog, EventBus, RouterEvent, SharedEventBus};
use crate::otel;
use crate::tier::ModelTier;

/// Reason recorded when the emergency tier times out
pub const NO_APPROVAL_REASON: &str = "no approval received";

/// Floor on the pruning interval when retention is very short
const MIN_PRUNE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// Approval workflow errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApprovalError {
    #[error("decision for task {task_id} does not call for escalation")]
    NotEscalated { task_id: String },

    #[error("task {task_id} already has active escalation request {request_id}")]
    AlreadyActive { task_id: String, request_id: Uuid },

    #[error("escalation request {0} not found")]
    NotFound(Uuid),

    #[error("{approver} is not an approver for the {tier} tier")]
    NotAnApprover { approver: String, tier: ApprovalTier },

    #[error("escalation request {id} already resolved as {status}")]
    Conflict { id: Uuid, status: ApprovalStatus },
}

struct RequestSlot {
    request: Mutex<EscalationRequest>,
    status: watch::Sender<ApprovalStatus>,
    cancel: CancellationToken,
}

impl RequestSlot {
    fn lock(&self) -> std::sync::MutexGuard<'_, EscalationRequest> {
        self.request.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct WorkflowInner {
    config: ApprovalConfig,
    requests: RwLock<HashMap<Uuid, Arc<RequestSlot>>>,
    /// task id → active request id
    active: Mutex<HashMap<String, Uuid>>,
    events: SharedEventBus,
    audit: AuditLog,
}

/// Multi-tier approval workflow. Cheap to clone.
#[derive(Clone)]
pub struct ApprovalWorkflow {
    inner: Arc<WorkflowInner>,
}

impl ApprovalWorkflow {
    pub fn new(config: ApprovalConfig, events: SharedEventBus, audit: AuditLog) -> Self {
        Self {
            inner: Arc::new(WorkflowInner {
                config,
                requests: RwLock::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
                events,
                audit,
            }),
        }
    }

    /// Workflow with a private event bus and no audit log
    pub fn standalone(config: ApprovalConfig) -> Self {
        Self::new(config, EventBus::new().shared(), AuditLog::disabled())
    }

    pub fn config(&self) -> &ApprovalConfig {
        &self.inner.config
    }

    /// Open an escalation request for a positive decision.
    ///
    /// High-confidence, non-security decisions are auto-approved on the spot.
    /// Everything else waits on the primary tier and starts its timer; must be
    /// called from within a Tokio runtime.
    pub fn submit(
        &self,
        task_context: TaskContext,
        decision: EscalationDecision,
    ) -> Result<EscalationRequest, ApprovalError> {
        if !decision.should_escalate {
            return Err(ApprovalError::NotEscalated {
                task_id: decision.task_id,
            });
        }

        let auto_approve = decision.confidence_score > self.inner.config.auto_approve_threshold
            && !task_context.security_impact.is_critical();

        let mut request = EscalationRequest::new(task_context, decision);
        let now = Utc::now();
        request.apply(ApprovalEvent::Submit { auto_approve }, now);
        if auto_approve {
            request.decided_by = Some("auto".to_string());
            request.decided_at = Some(now);
            request.decision_reason = Some(format!(
                "confidence {:.2} above auto-approve threshold {:.2}",
                request.decision.confidence_score, self.inner.config.auto_approve_threshold
            ));
        }

        {
            let mut active = self.inner.active.lock().unwrap_or_else(PoisonError::into_inner);
            let task_id = &request.task_context.task_id;
            if let Some(existing) = active.get(task_id) {
                return Err(ApprovalError::AlreadyActive {
                    task_id: task_id.clone(),
                    request_id: *existing,
                });
            }
            if !auto_approve {
                active.insert(task_id.clone(), request.id);
            }
        }

        let (status, _) = watch::channel(request.status);
        let slot = Arc::new(RequestSlot {
            request: Mutex::new(request.clone()),
            status,
            cancel: CancellationToken::new(),
        });
        self.inner
            .requests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request.id, slot.clone());

        info!(
            request_id = %request.id,
            task_id = %request.task_context.task_id,
            status = %request.status,
            confidence = request.decision.confidence_score,
            criteria = ?request.decision.triggered_names(),
            "Escalation request submitted"
        );
        self.publish_change(&request, ApprovalStatus::Pending);

        if request.is_terminal() {
            slot.cancel.cancel();
            self.inner.audit.record(AuditEntry::EscalationClosed {
                request: Box::new(request.clone()),
            });
        } else {
            self.spawn_timer(slot);
        }

        Ok(request)
    }

    /// Record an approver's decision on the tier currently responsible.
    ///
    /// First write wins: once a request is terminal every later decision gets
    /// [`ApprovalError::Conflict`].
    pub fn decide(
        &self,
        id: Uuid,
        approver: &str,
        approve: bool,
        reason: impl Into<String>,
    ) -> Result<EscalationRequest, ApprovalError> {
        let slot = self.slot(id).ok_or(ApprovalError::NotFound(id))?;

        let (request, from) = {
            let mut request = slot.lock();
            let from = request.status;
            let tier = match request.current_tier {
                Some(tier) if !request.is_terminal() => tier,
                _ => return Err(ApprovalError::Conflict { id, status: from }),
            };
            if !self
                .inner
                .config
                .approvers(tier)
                .iter()
                .any(|a| a == approver)
            {
                return Err(ApprovalError::NotAnApprover {
                    approver: approver.to_string(),
                    tier,
                });
            }

            let event = if approve {
                ApprovalEvent::Approve
            } else {
                ApprovalEvent::Reject
            };
            let now = Utc::now();
            if request.apply(event, now).is_none() {
                return Err(ApprovalError::Conflict { id, status: from });
            }
            request.decided_by = Some(approver.to_string());
            request.decided_at = Some(now);
            request.decision_reason = Some(reason.into());
            (request.clone(), from)
        };

        info!(
            request_id = %id,
            task_id = %request.task_context.task_id,
            approver,
            status = %request.status,
            "Escalation request decided"
        );
        self.finish(&slot, &request, from);
        Ok(request)
    }

    /// Current copy of a request
    pub fn get(&self, id: Uuid) -> Option<EscalationRequest> {
        self.slot(id).map(|slot| slot.lock().clone())
    }

    /// Requests still waiting on an approver, oldest first
    pub fn list_pending(&self) -> Vec<EscalationRequest> {
        let slots: Vec<Arc<RequestSlot>> = self
            .inner
            .requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut pending: Vec<EscalationRequest> = slots
            .iter()
            .map(|slot| slot.lock().clone())
            .filter(|r| !r.is_terminal())
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    /// Receiver notified on every status change of a request
    pub fn watch_status(&self, id: Uuid) -> Option<watch::Receiver<ApprovalStatus>> {
        self.slot(id).map(|slot| slot.status.subscribe())
    }

    /// Wait until the request is terminal and return the tier to run on.
    ///
    /// Never blocks past the emergency timeout: the timer resolves every
    /// request to approved or rejected.
    pub async fn wait_for_resolution(&self, id: Uuid) -> Result<ModelTier, ApprovalError> {
        let mut rx = self.watch_status(id).ok_or(ApprovalError::NotFound(id))?;
        loop {
            if let Some(tier) = rx.borrow_and_update().resolved_tier() {
                return Ok(tier);
            }
            if rx.changed().await.is_err() {
                // Sender gone; availability over premium
                return Ok(rx.borrow().resolved_tier().unwrap_or(ModelTier::Standard));
            }
        }
    }

    /// Drop requests resolved longer ago than the retention window
    pub fn prune_resolved(&self) -> usize {
        let cutoff = chrono::Duration::from_std(self.inner.config.resolved_retention())
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.prune_resolved_before(cutoff)
    }

    /// Drop requests resolved at or before `cutoff`, returning how many were removed.
    ///
    /// Closed requests are already in the audit log; only the in-memory slot goes.
    pub fn prune_resolved_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut requests = self
            .inner
            .requests
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = requests.len();
        requests.retain(|_, slot| {
            let request = slot.lock();
            !(request.is_terminal() && request.decided_at.is_some_and(|at| at <= cutoff))
        });
        before - requests.len()
    }

    /// Prune resolved requests on a fixed interval until cancelled
    pub fn spawn_pruner(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let workflow = self.clone();
        let period = self
            .inner
            .config
            .resolved_retention()
            .max(MIN_PRUNE_INTERVAL);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = workflow.prune_resolved();
                        if removed > 0 {
                            debug!(removed, "Pruned resolved escalation requests");
                        }
                    }
                }
            }
        })
    }

    /// Stop every timer. Pending requests stay pending.
    pub fn shutdown(&self) {
        let requests = self
            .inner
            .requests
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for slot in requests.values() {
            slot.cancel.cancel();
        }
    }

    fn slot(&self, id: Uuid) -> Option<Arc<RequestSlot>> {
        self.inner
            .requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn spawn_timer(&self, slot: Arc<RequestSlot>) {
        let workflow = self.clone();
        let (id, task_id) = {
            let request = slot.lock();
            (request.id, request.task_context.task_id.clone())
        };
        let span = otel::approval_span(&id.to_string(), &task_id);

        tokio::spawn(
            async move {
                loop {
                    let current = slot.lock().current_tier;
                    let Some(tier) = current else {
                        break;
                    };
                    let timeout = workflow.inner.config.timeout_for(tier);
                    tokio::select! {
                        biased;
                        _ = slot.cancel.cancelled() => break,
                        _ = tokio::time::sleep(timeout) => {
                            if workflow.on_timeout(&slot, tier) {
                                break;
                            }
                        }
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Advance on a tier timeout; returns true once the request is terminal
    fn on_timeout(&self, slot: &RequestSlot, tier: ApprovalTier) -> bool {
        let (request, from) = {
            let mut request = slot.lock();
            if request.current_tier != Some(tier) {
                return request.is_terminal();
            }
            let from = request.status;
            let now = Utc::now();
            if request.apply(ApprovalEvent::Timeout, now).is_none() {
                return request.is_terminal();
            }
            if request.is_terminal() {
                request.decided_at = Some(now);
                request.decision_reason = Some(NO_APPROVAL_REASON.to_string());
            }
            (request.clone(), from)
        };

        warn!(
            request_id = %request.id,
            task_id = %request.task_context.task_id,
            timed_out_tier = %tier,
            status = %request.status,
            "Approval tier timed out"
        );

        if request.is_terminal() {
            self.finish(slot, &request, from);
            true
        } else {
            slot.status.send_replace(request.status);
            self.publish_change(&request, from);
            false
        }
    }

    fn finish(&self, slot: &RequestSlot, request: &EscalationRequest, from: ApprovalStatus) {
        slot.cancel.cancel();
        {
            let mut active = self.inner.active.lock().unwrap_or_else(PoisonError::into_inner);
            if active.get(&request.task_context.task_id) == Some(&request.id) {
                active.remove(&request.task_context.task_id);
            }
        }
        slot.status.send_replace(request.status);
        self.publish_change(request, from);
        self.inner.audit.record(AuditEntry::EscalationClosed {
            request: Box::new(request.clone()),
        });
    }

    fn publish_change(&self, request: &EscalationRequest, from: ApprovalStatus) {
        self.inner.events.publish(RouterEvent::ApprovalStatusChanged {
            request_id: request.id,
            task_id: request.task_context.task_id.clone(),
            from,
            to: request.status,
            timestamp: Utc::now(),
        });
    }
}
