//! Execution manager: Runs a request on its tier's provider chain
//!
//! One attempt per usable provider, each under the attempt timeout. Premium
//! output is quality-checked and, on failure, re-run once on the standard
//! tier. Every outcome is written to the cost ledger.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::fallback::{CircuitBreaker, CircuitState, FallbackChain, SkippedProvider};
use super::provider::{ProviderError, ProviderRegistry, ProviderResponse};
use super::quality::{QualityChecker, QualityReport};
use super::rate_limit::SlidingWindowLimiter;
use crate::config::ExecutionConfig;
use crate::cost::{CostOutcome, CostRecord, SharedControlPlane, SharedCostLedger};
use crate::events::{AuditEntry, AuditLog, RouterEvent, SharedEventBus};
use crate::health::SharedHealthTable;
use crate::otel;
use crate::tier::ModelTier;

/// Key added to the payload of a quality fallback run
pub const QUALITY_FALLBACK_KEY: &str = "quality_fallback";

/// Work to run on a resolved tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub task_id: String,
    pub tier: ModelTier,
    pub payload: Value,
}

impl ExecutionRequest {
    pub fn new(task_id: impl Into<String>, tier: ModelTier, payload: Value) -> Self {
        Self {
            task_id: task_id.into(),
            tier,
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    /// Premium output failed the quality check; served by the standard tier
    QualityDowngrade,
}

impl ExecutionOutcome {
    fn cost_outcome(self) -> CostOutcome {
        match self {
            Self::Success => CostOutcome::Success,
            Self::QualityDowngrade => CostOutcome::QualityDowngrade,
        }
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cost_outcome())
    }
}

/// One provider call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub provider: String,
    pub model: String,
    pub tier: ModelTier,
    pub duration_ms: u64,
    /// None when the attempt succeeded
    pub error: Option<String>,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: String,
    pub requested_tier: ModelTier,
    /// Tier that produced `output`
    pub tier: ModelTier,
    pub model: String,
    pub provider: String,
    pub output: String,
    pub outcome: ExecutionOutcome,
    /// Usage summed over every successful call, including a discarded
    /// premium answer
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub attempts: Vec<AttemptRecord>,
    pub skipped: Vec<SkippedProvider>,
    /// Present for premium executions
    pub quality: Option<QualityReport>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("all providers failed for task {task_id} on the {tier} tier (attempted: {attempted:?})")]
    ProviderExhaustion {
        task_id: String,
        tier: ModelTier,
        attempted: Vec<String>,
        skipped: Vec<String>,
    },

    #[error("execution of task {task_id} was cancelled")]
    Cancelled {
        task_id: String,
        attempted: Vec<String>,
    },

    #[error("execution rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
}

impl ExecutionError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderExhaustion { .. } | Self::RateLimited { .. }
        )
    }

    /// Providers tried before the failure
    pub fn attempted(&self) -> &[String] {
        match self {
            Self::ProviderExhaustion { attempted, .. } | Self::Cancelled { attempted, .. } => {
                attempted
            }
            Self::RateLimited { .. } => &[],
        }
    }
}

#[derive(Debug, Default)]
struct Usage {
    requests: u32,
    tokens_in: u64,
    tokens_out: u64,
    cost: f64,
}

impl Usage {
    fn add(&mut self, response: &ProviderResponse) {
        self.requests += 1;
        self.tokens_in += response.tokens_in;
        self.tokens_out += response.tokens_out;
        self.cost += response.cost;
    }
}

/// Progress of one execution across chains
struct Run<'a> {
    request: &'a ExecutionRequest,
    cancel: &'a CancellationToken,
    started: Instant,
    usage: Usage,
    attempts: Vec<AttemptRecord>,
    skipped: Vec<SkippedProvider>,
}

impl Run<'_> {
    fn attempted(&self) -> Vec<String> {
        self.attempts.iter().map(|a| a.provider.clone()).collect()
    }
}

struct Served {
    tier: ModelTier,
    provider: String,
    model: String,
    output: String,
}

enum ChainFailure {
    Exhausted,
    Cancelled,
}

/// Runs execution requests against the provider chains
pub struct ExecutionManager {
    config: ExecutionConfig,
    providers: ProviderRegistry,
    health: SharedHealthTable,
    ledger: SharedCostLedger,
    control: SharedControlPlane,
    events: SharedEventBus,
    audit: AuditLog,
    breaker: Mutex<CircuitBreaker>,
    limiter: SlidingWindowLimiter,
    quality: QualityChecker,
}

impl ExecutionManager {
    pub fn new(
        config: ExecutionConfig,
        providers: ProviderRegistry,
        health: SharedHealthTable,
        ledger: SharedCostLedger,
        control: SharedControlPlane,
        events: SharedEventBus,
        audit: AuditLog,
    ) -> Self {
        let breaker = CircuitBreaker::new(
            config.breaker_failure_threshold,
            Duration::from_secs(config.breaker_cooldown_secs),
        );
        let limiter = SlidingWindowLimiter::per_minute(config.rate_limit_per_minute);
        let quality = QualityChecker::new(config.quality.clone());
        Self {
            config,
            providers,
            health,
            ledger,
            control,
            events,
            audit,
            breaker: Mutex::new(breaker),
            limiter,
            quality,
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn circuit_state(&self, provider: &str) -> CircuitState {
        self.breaker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state(provider)
    }

    /// Run the request on its tier; cancelling `cancel` abandons the
    /// in-flight attempt
    pub async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        let span = otel::execute_span(&request.task_id, request.tier);
        self.execute_inner(&request, cancel).instrument(span).await
    }

    async fn execute_inner(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        if self.control.current().rate_limiting {
            if let Err(retry_after) = self.limiter.try_acquire() {
                warn!(
                    task_id = %request.task_id,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Execution rejected by rate limiter"
                );
                return Err(ExecutionError::RateLimited { retry_after });
            }
        }

        let mut run = Run {
            request,
            cancel,
            started: Instant::now(),
            usage: Usage::default(),
            attempts: Vec::new(),
            skipped: Vec::new(),
        };

        let served = match self.run_chain(&mut run, request.tier, &request.payload).await {
            Ok(served) => served,
            Err(failure) => return Err(self.fail(run, request.tier, failure).await),
        };

        if request.tier != ModelTier::Premium {
            return Ok(self.succeed(run, served, ExecutionOutcome::Success, None).await);
        }

        let report = self.quality.check(&served.output);
        if report.passed {
            return Ok(self
                .succeed(run, served, ExecutionOutcome::Success, Some(report))
                .await);
        }

        warn!(
            task_id = %request.task_id,
            provider = %served.provider,
            score = report.score,
            issues = %report.summary(),
            "Premium output failed quality check, retrying on standard tier"
        );
        let fallback_tier = request.tier.downgrade();
        let payload = quality_fallback_payload(&request.payload, request.tier, &report);
        match self.run_chain(&mut run, fallback_tier, &payload).await {
            Ok(fallback) => Ok(self
                .succeed(run, fallback, ExecutionOutcome::QualityDowngrade, Some(report))
                .await),
            Err(ChainFailure::Cancelled) => {
                Err(self.fail(run, fallback_tier, ChainFailure::Cancelled).await)
            }
            Err(ChainFailure::Exhausted) => {
                warn!(
                    task_id = %request.task_id,
                    "Standard tier unavailable for quality fallback, keeping premium output"
                );
                Ok(self
                    .succeed(run, served, ExecutionOutcome::Success, Some(report))
                    .await)
            }
        }
    }

    /// Walk one tier's attempt plan until a provider answers
    async fn run_chain(
        &self,
        run: &mut Run<'_>,
        tier: ModelTier,
        payload: &Value,
    ) -> Result<Served, ChainFailure> {
        let route = self.config.route(tier);
        let chain = FallbackChain::new(route.model.clone(), route.providers.clone());
        let plan = {
            let breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
            chain.plan(&self.health, &breaker)
        };
        for skipped in &plan.skipped {
            debug!(
                task_id = %run.request.task_id,
                provider = %skipped.provider,
                reason = %skipped.reason,
                "Provider skipped"
            );
        }
        run.skipped.extend(plan.skipped.iter().cloned());

        for provider in plan {
            if run.cancel.is_cancelled() {
                return Err(ChainFailure::Cancelled);
            }
            let number = run.attempts.len() as u32 + 1;
            let span =
                otel::provider_attempt_span(&run.request.task_id, &provider, &route.model, number);
            let started = Instant::now();
            let result = self
                .attempt(&provider, &route.model, payload, run.cancel)
                .instrument(span.clone())
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let mut record = AttemptRecord {
                provider: provider.clone(),
                model: route.model.clone(),
                tier,
                duration_ms,
                error: None,
            };
            match result {
                None => {
                    otel::record_attempt_result(&span, false, duration_ms, 0);
                    record.error = Some("cancelled".to_string());
                    run.attempts.push(record);
                    return Err(ChainFailure::Cancelled);
                }
                Some(Ok(response)) => {
                    otel::record_attempt_result(&span, true, duration_ms, response.tokens());
                    self.breaker
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .record_success(&provider);
                    run.usage.add(&response);
                    run.attempts.push(record);
                    return Ok(Served {
                        tier,
                        provider,
                        model: route.model.clone(),
                        output: response.output,
                    });
                }
                Some(Err(e)) => {
                    otel::record_attempt_result(&span, false, duration_ms, 0);
                    if e.is_retryable() {
                        self.breaker
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .record_failure(&provider);
                    }
                    warn!(
                        task_id = %run.request.task_id,
                        provider = %provider,
                        model = %route.model,
                        attempt = number,
                        error = %e,
                        "Provider attempt failed"
                    );
                    record.error = Some(e.to_string());
                    run.attempts.push(record);
                }
            }
        }
        Err(ChainFailure::Exhausted)
    }

    /// One provider call; None when cancelled first
    async fn attempt(
        &self,
        provider: &str,
        model: &str,
        payload: &Value,
        cancel: &CancellationToken,
    ) -> Option<Result<ProviderResponse, ProviderError>> {
        let Some(adapter) = self.providers.get(provider) else {
            return Some(Err(ProviderError::Unregistered(provider.to_string())));
        };
        let timeout = self.config.attempt_timeout();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, adapter.invoke(model, payload)) => {
                Some(result.unwrap_or_else(|_| Err(ProviderError::Timeout(timeout))))
            }
        }
    }

    async fn succeed(
        &self,
        run: Run<'_>,
        served: Served,
        outcome: ExecutionOutcome,
        quality: Option<QualityReport>,
    ) -> ExecutionResult {
        let record = CostRecord::new(
            &run.request.task_id,
            served.tier,
            &served.model,
            outcome.cost_outcome(),
        )
        .with_usage(
            run.usage.requests,
            run.usage.tokens_in,
            run.usage.tokens_out,
            run.usage.cost,
        )
        .with_provider(&served.provider);
        self.record(record, run.attempted(), run.started).await;

        info!(
            task_id = %run.request.task_id,
            tier = %served.tier,
            provider = %served.provider,
            outcome = %outcome,
            cost = run.usage.cost,
            attempts = run.attempts.len(),
            "Execution completed"
        );

        ExecutionResult {
            task_id: run.request.task_id.clone(),
            requested_tier: run.request.tier,
            tier: served.tier,
            model: served.model,
            provider: served.provider,
            output: served.output,
            outcome,
            tokens_in: run.usage.tokens_in,
            tokens_out: run.usage.tokens_out,
            cost: run.usage.cost,
            attempts: run.attempts,
            skipped: run.skipped,
            quality,
        }
    }

    async fn fail(&self, run: Run<'_>, tier: ModelTier, failure: ChainFailure) -> ExecutionError {
        let task_id = run.request.task_id.clone();
        let attempted = run.attempted();
        let model = self.config.route(tier).model.clone();

        let error = match failure {
            ChainFailure::Exhausted => {
                warn!(
                    task_id = %task_id,
                    tier = %tier,
                    attempted = ?attempted,
                    skipped = run.skipped.len(),
                    "Provider chain exhausted"
                );
                ExecutionError::ProviderExhaustion {
                    task_id: task_id.clone(),
                    tier,
                    attempted: attempted.clone(),
                    skipped: run.skipped.iter().map(|s| s.provider.clone()).collect(),
                }
            }
            ChainFailure::Cancelled => {
                info!(task_id = %task_id, attempted = ?attempted, "Execution cancelled");
                ExecutionError::Cancelled {
                    task_id: task_id.clone(),
                    attempted: attempted.clone(),
                }
            }
        };

        let outcome = if matches!(error, ExecutionError::Cancelled { .. }) {
            CostOutcome::Cancelled
        } else {
            CostOutcome::ProviderExhaustion
        };
        let record = CostRecord::new(task_id, tier, model, outcome).with_usage(
            run.usage.requests,
            run.usage.tokens_in,
            run.usage.tokens_out,
            run.usage.cost,
        );
        self.record(record, attempted, run.started).await;
        error
    }

    /// Ledger, event feed, audit trail and span fields for one outcome
    async fn record(&self, record: CostRecord, attempted: Vec<String>, started: Instant) {
        otel::record_execution_result(
            &tracing::Span::current(),
            &record.outcome.to_string(),
            record.cost_amount,
            started.elapsed().as_millis() as u64,
        );
        self.ledger.record(record.clone()).await;
        self.events.publish(RouterEvent::ExecutionRecorded {
            record: record.clone(),
            attempted: attempted.clone(),
        });
        self.audit.record(AuditEntry::Execution { record, attempted });
    }
}

/// Original payload marked as a quality fallback run
pub(crate) fn quality_fallback_payload(
    payload: &Value,
    from: ModelTier,
    report: &QualityReport,
) -> Value {
    let marker = json!({
        "from_tier": from,
        "reason": "quality_check_failed",
        "score": report.score,
        "issues": report.issues.iter().map(|i| i.to_string()).collect::<Vec<_>>(),
    });
    match payload {
        Value::Object(map) => {
            let mut map = map.clone();
            map.insert(QUALITY_FALLBACK_KEY.to_string(), marker);
            Value::Object(map)
        }
        other => json!({ "input": other, QUALITY_FALLBACK_KEY: marker }),
    }
}
