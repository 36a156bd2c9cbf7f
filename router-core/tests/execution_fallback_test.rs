//! Integration tests for health-aware provider fallback through the router

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use router_core::config::{RouterConfig, TierRoute};
use router_core::cost::CostOutcome;
use router_core::events::RouterEvent;
use router_core::health::{HealthTable, ProbeReport, ProviderHealth};
use router_core::{
    EscalationRouter, ExecutionError, ModelTier, ProviderAdapter, ProviderError, ProviderResponse,
    RoutingError, TaskContext,
};

const ANSWER: &str = "impl Display for Ticket { fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { write!(f, \"{}\", self.id) } }";

/// Adapter that either answers or fails, counting calls
struct Counting {
    id: &'static str,
    up: bool,
    calls: AtomicU32,
}

impl Counting {
    fn new(id: &'static str, up: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            up,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for Counting {
    fn id(&self) -> &str {
        self.id
    }

    async fn invoke(&self, _model: &str, _payload: &Value) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.up {
            Ok(ProviderResponse::new(ANSWER).with_usage(200, 80, 0.02))
        } else {
            Err(ProviderError::Failed("503 service unavailable".into()))
        }
    }
}

fn config() -> RouterConfig {
    let mut config = RouterConfig::default();
    config.execution.standard = TierRoute {
        model: "standard-coder".to_string(),
        providers: vec!["a".to_string(), "b".to_string()],
    };
    config
}

fn mark_unhealthy(table: &HealthTable, provider: &str, model: &str) {
    table.update(ProviderHealth::from_report(
        provider,
        model,
        ModelTier::Standard,
        &ProbeReport::failed("connection refused"),
        Utc::now(),
    ));
}

/// Test: chain [A, B] with A unhealthy runs B first and never touches A
#[tokio::test]
async fn test_unhealthy_primary_is_never_attempted() {
    let a = Counting::new("a", true);
    let b = Counting::new("b", true);
    let health = HealthTable::new().shared();
    mark_unhealthy(&health, "a", "standard-coder");

    let router = EscalationRouter::builder(config())
        .provider(a.clone())
        .provider(b.clone())
        .health_table(health)
        .build();

    let routed = router
        .route_and_execute(
            TaskContext::new("t-fallback"),
            json!({"prompt": "implement Display"}),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(routed.result.provider, "b");
    assert_eq!(routed.result.attempts.len(), 1);
    assert_eq!(a.calls(), 0);
    assert_eq!(b.calls(), 1);
}

/// Test: every provider failing is a retryable exhaustion with zero cost
#[tokio::test]
async fn test_exhaustion_is_retryable_and_free() {
    let a = Counting::new("a", false);
    let b = Counting::new("b", false);
    let router = EscalationRouter::builder(config())
        .provider(a.clone())
        .provider(b.clone())
        .build();
    let mut rx = router.subscribe();

    let err = router
        .route_and_execute(
            TaskContext::new("t-down"),
            json!({"prompt": "anything"}),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    match &err {
        RoutingError::Execution(ExecutionError::ProviderExhaustion { attempted, .. }) => {
            assert_eq!(attempted, &vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let records = router.ledger().records_for("t-down").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, CostOutcome::ProviderExhaustion);
    assert_eq!(records[0].cost_amount, 0.0);
    assert_eq!(router.ledger().totals().await.daily.cost, 0.0);

    let mut recorded = false;
    while let Ok(event) = rx.try_recv() {
        if let RouterEvent::ExecutionRecorded { record, attempted } = event {
            assert_eq!(record.outcome, CostOutcome::ProviderExhaustion);
            assert_eq!(attempted.len(), 2);
            recorded = true;
        }
    }
    assert!(recorded);
}

/// Test: a degraded primary is tried after a healthy secondary
#[tokio::test]
async fn test_degraded_primary_moves_behind() {
    let a = Counting::new("a", true);
    let b = Counting::new("b", true);
    let health = HealthTable::new().shared();
    health.update(ProviderHealth::from_report(
        "a",
        "standard-coder",
        ModelTier::Standard,
        &ProbeReport {
            connectivity: 1.0,
            rate_limit_headroom: 0.0,
            model_available: 1.0,
            error: None,
            timed_out: false,
        },
        Utc::now(),
    ));

    let router = EscalationRouter::builder(config())
        .provider(a.clone())
        .provider(b.clone())
        .health_table(health)
        .build();
    let result = router
        .route_and_execute(
            TaskContext::new("t-degraded"),
            json!({}),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .result;
    assert_eq!(result.provider, "b");
    assert_eq!(a.calls(), 0);
}
