//! Integration tests for approval tier timeouts on a paused clock

use std::time::Duration;

use router_core::approval::{ApprovalStatus, ApprovalTier, ApprovalWorkflow, NO_APPROVAL_REASON};
use router_core::config::ApprovalConfig;
use router_core::cost::ControlSnapshot;
use router_core::events::{EventBus, RouterEvent};
use router_core::{AuditLog, EscalationEngine, ModelTier, SecurityImpact, TaskContext};

const MINUTE: Duration = Duration::from_secs(60);

fn security_task(task_id: &str) -> (TaskContext, router_core::EscalationDecision) {
    let ctx = TaskContext::new(task_id).with_security(SecurityImpact::DataBreach);
    let decision = EscalationEngine::new()
        .decide(&ctx, &ControlSnapshot::default())
        .unwrap();
    (ctx, decision)
}

/// Let spawned timer tasks observe the clock
async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

/// Test: an undecided request walks every tier and ends rejected
#[tokio::test(start_paused = true)]
async fn test_undecided_request_walks_all_tiers() {
    let workflow = ApprovalWorkflow::standalone(ApprovalConfig::default());
    let (ctx, decision) = security_task("t-timeout");
    let request = workflow.submit(ctx, decision).unwrap();
    assert_eq!(request.status, ApprovalStatus::AwaitingPrimary);
    settle().await;

    tokio::time::advance(29 * MINUTE).await;
    settle().await;
    assert_eq!(
        workflow.get(request.id).unwrap().status,
        ApprovalStatus::AwaitingPrimary
    );

    tokio::time::advance(2 * MINUTE).await;
    settle().await;
    let current = workflow.get(request.id).unwrap();
    assert_eq!(current.status, ApprovalStatus::AwaitingSecondary);
    assert_eq!(current.current_tier, Some(ApprovalTier::Secondary));

    tokio::time::advance(61 * MINUTE).await;
    settle().await;
    assert_eq!(
        workflow.get(request.id).unwrap().status,
        ApprovalStatus::AwaitingEmergency
    );

    tokio::time::advance(16 * MINUTE).await;
    settle().await;
    let closed = workflow.get(request.id).unwrap();
    assert_eq!(closed.status, ApprovalStatus::Rejected);
    assert_eq!(closed.decision_reason.as_deref(), Some(NO_APPROVAL_REASON));
    assert!(closed.decided_by.is_none());

    let path: Vec<ApprovalStatus> = closed.history.iter().map(|c| c.to).collect();
    assert_eq!(
        path,
        vec![
            ApprovalStatus::AwaitingPrimary,
            ApprovalStatus::AwaitingSecondary,
            ApprovalStatus::AwaitingEmergency,
            ApprovalStatus::Rejected,
        ]
    );
    assert_eq!(
        workflow.wait_for_resolution(request.id).await.unwrap(),
        ModelTier::Standard
    );
}

/// Test: waiting never outlives the emergency tier
#[tokio::test(start_paused = true)]
async fn test_wait_resolves_by_emergency_deadline() {
    let workflow = ApprovalWorkflow::standalone(ApprovalConfig::default());
    let (ctx, decision) = security_task("t-wait");
    let request = workflow.submit(ctx, decision).unwrap();

    let start = tokio::time::Instant::now();
    let tier = workflow.wait_for_resolution(request.id).await.unwrap();
    assert_eq!(tier, ModelTier::Standard);
    assert!(start.elapsed() >= (30 + 60 + 15) * MINUTE);
    assert!(start.elapsed() < (30 + 60 + 15 + 1) * MINUTE);
}

/// Test: a secondary approver approves after the primary tier lapsed
#[tokio::test(start_paused = true)]
async fn test_secondary_approval_after_primary_timeout() {
    let config = ApprovalConfig::default();
    let secondary = config.secondary_approvers[0].clone();
    let primary = config.primary_approvers[0].clone();
    let workflow = ApprovalWorkflow::standalone(config);
    let (ctx, decision) = security_task("t-secondary");
    let request = workflow.submit(ctx, decision).unwrap();
    settle().await;

    tokio::time::advance(31 * MINUTE).await;
    settle().await;

    // the primary tier is no longer responsible
    assert!(workflow.decide(request.id, &primary, true, "late").is_err());

    let approved = workflow
        .decide(request.id, &secondary, true, "looked at the auth change")
        .unwrap();
    assert_eq!(approved.status, ApprovalStatus::Approved);
    assert_eq!(approved.decided_by.as_deref(), Some(secondary.as_str()));

    // first write wins; the timer can no longer reject it
    tokio::time::advance(120 * MINUTE).await;
    settle().await;
    assert_eq!(
        workflow.get(request.id).unwrap().status,
        ApprovalStatus::Approved
    );
    assert_eq!(
        workflow.wait_for_resolution(request.id).await.unwrap(),
        ModelTier::Premium
    );
}

/// Test: every status change reaches the event feed
#[tokio::test(start_paused = true)]
async fn test_status_changes_are_published() {
    let bus = EventBus::new().shared();
    let mut rx = bus.subscribe();
    let workflow = ApprovalWorkflow::new(ApprovalConfig::default(), bus.clone(), AuditLog::disabled());
    let (ctx, decision) = security_task("t-events");
    let request = workflow.submit(ctx, decision).unwrap();

    workflow.wait_for_resolution(request.id).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let RouterEvent::ApprovalStatusChanged { request_id, to, .. } = event {
            assert_eq!(request_id, request.id);
            seen.push(to);
        }
    }
    assert_eq!(
        seen,
        vec![
            ApprovalStatus::AwaitingPrimary,
            ApprovalStatus::AwaitingSecondary,
            ApprovalStatus::AwaitingEmergency,
            ApprovalStatus::Rejected,
        ]
    );
}
