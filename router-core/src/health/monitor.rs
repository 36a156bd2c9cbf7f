//! Health monitor: Periodic probing of every provider/model pair
//!
//! Each pair runs on its own timer (standard tier every 30 s, premium every
//! 60 s) and each probe is bounded by its own timeout, so one hung provider
//! never delays the others.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::probe::{HttpProbe, ProbeError, ProviderProbe};
use super::{
    HealthCheckMetrics, HealthCheckMetricsSnapshot, HealthStatus, ProbeReport, ProviderHealth,
    SharedHealthTable,
};
use crate::config::{ExecutionConfig, HealthConfig};
use crate::events::{RouterEvent, SharedEventBus};
use crate::otel;
use crate::tier::ModelTier;

/// One provider/model pair to watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub provider: String,
    pub model: String,
    pub tier: ModelTier,
}

impl ProbeTarget {
    /// Every pair named by the tier routes, standard tier first, deduplicated
    pub fn from_routes(execution: &ExecutionConfig) -> Vec<ProbeTarget> {
        let mut seen = BTreeSet::new();
        let mut targets = Vec::new();
        for tier in ModelTier::all() {
            let route = execution.route(*tier);
            for provider in &route.providers {
                if seen.insert((provider.clone(), route.model.clone())) {
                    targets.push(ProbeTarget {
                        provider: provider.clone(),
                        model: route.model.clone(),
                        tier: *tier,
                    });
                }
            }
        }
        targets
    }
}

/// Periodic provider health checker
pub struct HealthMonitor {
    probe: Arc<dyn ProviderProbe>,
    table: SharedHealthTable,
    config: HealthConfig,
    targets: Vec<ProbeTarget>,
    metrics: HealthCheckMetrics,
    events: SharedEventBus,
}

impl HealthMonitor {
    pub fn new(
        probe: Arc<dyn ProviderProbe>,
        table: SharedHealthTable,
        config: HealthConfig,
        targets: Vec<ProbeTarget>,
        events: SharedEventBus,
    ) -> Self {
        Self {
            probe,
            table,
            config,
            targets,
            metrics: HealthCheckMetrics::default(),
            events,
        }
    }

    /// Monitor using [`HttpProbe`] against the configured endpoints
    pub fn http_from_config(
        health: &HealthConfig,
        execution: &ExecutionConfig,
        table: SharedHealthTable,
        events: SharedEventBus,
    ) -> Result<Self, ProbeError> {
        let probe = HttpProbe::new(health.endpoints.clone(), health.probe_timeout())?;
        Ok(Self::new(
            Arc::new(probe),
            table,
            health.clone(),
            ProbeTarget::from_routes(execution),
            events,
        ))
    }

    pub fn targets(&self) -> &[ProbeTarget] {
        &self.targets
    }

    pub fn table(&self) -> &SharedHealthTable {
        &self.table
    }

    pub fn metrics(&self) -> HealthCheckMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Probe one pair under the probe timeout and record the result
    pub async fn check_once(&self, target: &ProbeTarget) -> ProviderHealth {
        let span = otel::health_check_span(&target.provider, &target.model, target.tier);
        async {
            let report = match tokio::time::timeout(
                self.config.probe_timeout(),
                self.probe.probe(&target.provider, &target.model),
            )
            .await
            {
                Ok(report) => report,
                Err(_) => ProbeReport::timed_out(),
            };

            let health = ProviderHealth::from_report(
                target.provider.clone(),
                target.model.clone(),
                target.tier,
                &report,
                Utc::now(),
            );
            otel::record_health(&tracing::Span::current(), &health);
            self.metrics.record(&health, &report);

            let previous = self.table.update(health.clone());
            let previous_status = previous.map(|p| p.status).unwrap_or(HealthStatus::Healthy);
            if previous_status != health.status {
                warn!(
                    provider = %health.provider_id,
                    model = %health.model_id,
                    from = %previous_status,
                    to = %health.status,
                    score = health.score,
                    error = health.last_error.as_deref().unwrap_or(""),
                    "Provider health changed"
                );
            } else {
                debug!(
                    provider = %health.provider_id,
                    model = %health.model_id,
                    status = %health.status,
                    score = health.score,
                    "Provider health checked"
                );
            }

            self.events.publish(RouterEvent::ProviderHealthUpdated {
                health: health.clone(),
            });
            health
        }
        .instrument(span)
        .await
    }

    /// Probe every target in parallel
    pub async fn run_once(&self) -> Vec<ProviderHealth> {
        join_all(self.targets.iter().map(|t| self.check_once(t))).await
    }

    /// Start one timer task per target; all stop when `cancel` fires
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        info!(targets = self.targets.len(), "Health monitor started");
        (0..self.targets.len())
            .map(|idx| {
                let monitor = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let target = monitor.targets[idx].clone();
                    let mut interval =
                        tokio::time::interval(monitor.config.interval_for(target.tier));
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            _ = interval.tick() => {
                                monitor.check_once(&target).await;
                            }
                        }
                    }
                    debug!(provider = %target.provider, model = %target.model, "Health check loop stopped");
                })
            })
            .collect()
    }
}
