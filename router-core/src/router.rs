//! Escalation router: One handle over the whole pipeline
//!
//! ```text
//! TaskContext ─decide─▶ EscalationDecision
//!                           │ escalate?
//!                 no ───────┴──────── yes
//!                 │                    │
//!             standard          ApprovalWorkflow ─resolves─▶ premium | standard
//!                 └─────────┬──────────┘
//!                           ▼
//!                   ExecutionManager ─▶ CostLedger ◀── BudgetEnforcer ─▶ ControlPlane
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use router_core::{EscalationRouter, RouterConfig, TaskContext};
//!
//! let router = EscalationRouter::builder(RouterConfig::default())
//!     .provider(Arc::new(my_adapter))
//!     .build();
//! let routed = router
//!     .route_and_execute(TaskContext::new("task-7"), payload, &cancel)
//!     .await?;
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::approval::{ApprovalWorkflow, EscalationRequest};
use crate::config::RouterConfig;
use crate::context::TaskContext;
use crate::cost::{
    BudgetEnforcer, ControlPlane, ControlSnapshot, CostLedger, SharedControlPlane,
    SharedCostLedger,
};
use crate::error::RoutingResult;
use crate::escalation::{DecisionReview, EscalationDecision, EscalationEngine};
use crate::events::{AuditEntry, AuditLog, EventBus, RouterEvent, SharedEventBus};
use crate::execution::{
    ExecutionManager, ExecutionRequest, ExecutionResult, ProviderAdapter, ProviderRegistry,
};
use crate::health::{HealthTable, SharedHealthTable};
use crate::otel;
use crate::tier::ModelTier;

/// Where a task ended up before execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingOutcome {
    pub decision: EscalationDecision,
    /// Present when the decision called for escalation
    pub request: Option<EscalationRequest>,
    pub tier: ModelTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedExecution {
    pub routing: RoutingOutcome,
    pub result: ExecutionResult,
}

/// Builder for [`EscalationRouter`]
pub struct RouterBuilder {
    config: RouterConfig,
    providers: ProviderRegistry,
    events: Option<SharedEventBus>,
    audit: AuditLog,
    health: Option<SharedHealthTable>,
    ledger: Option<SharedCostLedger>,
}

impl RouterBuilder {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            providers: ProviderRegistry::new(),
            events: None,
            audit: AuditLog::disabled(),
            health: None,
            ledger: None,
        }
    }

    /// Register one provider adapter
    pub fn provider(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.providers.register(adapter);
        self
    }

    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    /// Share a health table with an externally driven monitor
    pub fn health_table(mut self, health: SharedHealthTable) -> Self {
        self.health = Some(health);
        self
    }

    pub fn ledger(mut self, ledger: SharedCostLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn build(self) -> EscalationRouter {
        let config = self.config;
        let events = self.events.unwrap_or_else(|| EventBus::new().shared());
        let health = self.health.unwrap_or_else(|| HealthTable::new().shared());
        let ledger = self
            .ledger
            .unwrap_or_else(|| CostLedger::new(config.budget.escalation_window()).shared());
        let control =
            ControlPlane::new(ControlSnapshot::baseline(&config.criteria, &config.budget)).shared();

        for tier in ModelTier::all() {
            for provider in &config.execution.route(*tier).providers {
                if !self.providers.contains(provider) {
                    warn!(provider = %provider, tier = %tier, "No adapter registered for provider in route");
                }
            }
        }

        let engine = EscalationEngine::with_config(config.criteria.clone());
        let approvals =
            ApprovalWorkflow::new(config.approval.clone(), events.clone(), self.audit.clone());
        let execution = ExecutionManager::new(
            config.execution.clone(),
            self.providers,
            health.clone(),
            ledger.clone(),
            control.clone(),
            events.clone(),
            self.audit.clone(),
        );
        let enforcer = Arc::new(BudgetEnforcer::new(
            ledger.clone(),
            control.clone(),
            config.criteria.clone(),
            config.budget.clone(),
            events.clone(),
            self.audit.clone(),
        ));

        EscalationRouter {
            config,
            engine,
            approvals,
            execution,
            enforcer,
            health,
            ledger,
            control,
            events,
            audit: self.audit,
        }
    }
}

/// Decision engine, approval workflow, execution manager and budget
/// enforcer wired to one ledger, health table and control plane
pub struct EscalationRouter {
    config: RouterConfig,
    engine: EscalationEngine,
    approvals: ApprovalWorkflow,
    execution: ExecutionManager,
    enforcer: Arc<BudgetEnforcer>,
    health: SharedHealthTable,
    ledger: SharedCostLedger,
    control: SharedControlPlane,
    events: SharedEventBus,
    audit: AuditLog,
}

impl EscalationRouter {
    pub fn builder(config: RouterConfig) -> RouterBuilder {
        RouterBuilder::new(config)
    }

    /// Score a task against the controls currently in force and count the
    /// decision toward the escalation rate
    pub async fn decide(&self, ctx: &TaskContext) -> RoutingResult<EscalationDecision> {
        let span = otel::decide_span(&ctx.task_id);
        let decision = self
            .engine
            .decide(ctx, &self.control.current())
            .map_err(|e| {
                warn!(task_id = %ctx.task_id, error = %e, "Task context rejected");
                e
            })?;
        otel::record_decision(&span, &decision);

        async {
            self.ledger.record_decision(decision.should_escalate).await;
            info!(
                task_id = %decision.task_id,
                escalate = decision.should_escalate,
                score = decision.score,
                cutoff = decision.cutoff,
                confidence = decision.confidence_score,
                path = ?decision.path,
                criteria = ?decision.triggered_names(),
                "Escalation decision"
            );
        }
        .instrument(span)
        .await;

        self.events.publish(RouterEvent::DecisionMade {
            decision: decision.clone(),
            timestamp: Utc::now(),
        });
        self.audit.record(AuditEntry::Decision {
            decision: decision.clone(),
        });
        Ok(decision)
    }

    /// Decide, then wait for approval when the decision escalates
    pub async fn route(&self, ctx: TaskContext) -> RoutingResult<RoutingOutcome> {
        let decision = self.decide(&ctx).await?;
        if !decision.should_escalate {
            return Ok(RoutingOutcome {
                decision,
                request: None,
                tier: ModelTier::Standard,
            });
        }

        let request = self.approvals.submit(ctx, decision.clone())?;
        let tier = self.approvals.wait_for_resolution(request.id).await?;
        let request = self.approvals.get(request.id).unwrap_or(request);
        Ok(RoutingOutcome {
            decision,
            request: Some(request),
            tier,
        })
    }

    pub async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: &CancellationToken,
    ) -> RoutingResult<ExecutionResult> {
        Ok(self.execution.execute(request, cancel).await?)
    }

    /// Route a task and run the payload on the tier it resolves to
    pub async fn route_and_execute(
        &self,
        ctx: TaskContext,
        payload: Value,
        cancel: &CancellationToken,
    ) -> RoutingResult<RoutedExecution> {
        let task_id = ctx.task_id.clone();
        let routing = self.route(ctx).await?;
        let request = ExecutionRequest::new(task_id, routing.tier, payload);
        let result = self.execute(request, cancel).await?;
        Ok(RoutedExecution { routing, result })
    }

    /// Record an approver's decision on an escalation request
    pub fn review_request(
        &self,
        id: Uuid,
        approver: &str,
        approve: bool,
        reason: impl Into<String>,
    ) -> RoutingResult<EscalationRequest> {
        Ok(self.approvals.decide(id, approver, approve, reason)?)
    }

    pub fn request_status(&self, id: Uuid) -> Option<EscalationRequest> {
        self.approvals.get(id)
    }

    /// Heuristic false-positive / false-negative review of a decision
    pub fn validate_decision(&self, decision: &EscalationDecision) -> DecisionReview {
        self.engine.validate(decision)
    }

    /// Live event feed
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    /// Run the budget enforcer until `cancel` fires
    pub fn spawn_enforcer(&self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.enforcer.clone().run(cancel))
    }

    /// Evict resolved approval requests past their retention until `cancel` fires
    pub fn spawn_approval_pruner(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.approvals.spawn_pruner(cancel)
    }

    /// Stop approval timers; pending requests stay pending
    pub fn shutdown(&self) {
        self.approvals.shutdown();
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn engine(&self) -> &EscalationEngine {
        &self.engine
    }

    pub fn approvals(&self) -> &ApprovalWorkflow {
        &self.approvals
    }

    pub fn execution(&self) -> &ExecutionManager {
        &self.execution
    }

    pub fn enforcer(&self) -> &Arc<BudgetEnforcer> {
        &self.enforcer
    }

    pub fn health(&self) -> &SharedHealthTable {
        &self.health
    }

    pub fn ledger(&self) -> &SharedCostLedger {
        &self.ledger
    }

    pub fn control(&self) -> &SharedControlPlane {
        &self.control
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }
}
