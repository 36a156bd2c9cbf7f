//! Budget enforcer: Closes the loop from spend back to routing
//!
//! Each tick reads rolling totals from the ledger, detects breaches, raises
//! alerts and publishes a fresh [`ControlSnapshot`]. The snapshot is rebuilt
//! from the static baseline every time, so a corrective action lasts exactly
//! as long as its breach.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use super::control::{ControlSnapshot, SharedControlPlane};
use super::ledger::{RollingTotals, SharedCostLedger};
use crate::config::{BudgetConfig, CriteriaConfig};
use crate::events::{AuditEntry, AuditLog, RouterEvent, SharedEventBus};
use crate::otel;

/// Multiple of the threshold at which a breach becomes critical
pub const CRITICAL_MULTIPLE: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    DailyBudget,
    ApproachingDailyBudget,
    EscalationRate,
    ProjectedMonthlyOverrun,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DailyBudget => write!(f, "daily_budget"),
            Self::ApproachingDailyBudget => write!(f, "approaching_daily_budget"),
            Self::EscalationRate => write!(f, "escalation_rate"),
            Self::ProjectedMonthlyOverrun => write!(f, "projected_monthly_overrun"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// The single action tied to each breach
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CorrectiveAction {
    EnableRateLimiting,
    RaiseCutoff { by: f64 },
    CostSavingMode,
    NoAction,
}

impl CorrectiveAction {
    fn apply(&self, snapshot: &mut ControlSnapshot) {
        match self {
            Self::EnableRateLimiting => snapshot.rate_limiting = true,
            Self::RaiseCutoff { by } => {
                snapshot.cutoff = (snapshot.cutoff + by).min(1.0);
                snapshot.rate_breached = true;
            }
            Self::CostSavingMode => snapshot.cost_saving_mode = true,
            Self::NoAction => {}
        }
    }

    fn recommendation(&self) -> String {
        match self {
            Self::EnableRateLimiting => "rate limiting enabled until daily spend recovers".into(),
            Self::RaiseCutoff { by } => format!("escalation cutoff raised by {:.2}", by),
            Self::CostSavingMode => "cost-saving mode: borderline escalations use standard tier".into(),
            Self::NoAction => "review spend; daily budget nearly exhausted".into(),
        }
    }
}

/// Alert raised by the enforcer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub current_value: f64,
    pub threshold: f64,
    pub recommended_action: String,
    pub action: CorrectiveAction,
    pub raised_at: DateTime<Utc>,
}

/// Internal breach signal; never leaves the enforcer
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct BudgetBreach {
    pub alert_type: AlertType,
    pub current: f64,
    pub threshold: f64,
}

impl BudgetBreach {
    fn severity(&self) -> AlertSeverity {
        if self.alert_type != AlertType::ApproachingDailyBudget
            && self.current >= self.threshold * CRITICAL_MULTIPLE
        {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        }
    }

    fn action(&self, config: &BudgetConfig) -> CorrectiveAction {
        match self.alert_type {
            AlertType::DailyBudget => CorrectiveAction::EnableRateLimiting,
            AlertType::EscalationRate => CorrectiveAction::RaiseCutoff {
                by: config.tighten_step,
            },
            AlertType::ProjectedMonthlyOverrun => CorrectiveAction::CostSavingMode,
            AlertType::ApproachingDailyBudget => CorrectiveAction::NoAction,
        }
    }
}

/// Breaches present in a set of totals
pub(crate) fn detect_breaches(totals: &RollingTotals, config: &BudgetConfig) -> Vec<BudgetBreach> {
    let mut breaches = Vec::new();

    let daily = totals.daily.cost;
    if daily >= config.daily_budget {
        breaches.push(BudgetBreach {
            alert_type: AlertType::DailyBudget,
            current: daily,
            threshold: config.daily_budget,
        });
    } else if daily >= config.daily_budget * config.warn_fraction {
        breaches.push(BudgetBreach {
            alert_type: AlertType::ApproachingDailyBudget,
            current: daily,
            threshold: config.daily_budget * config.warn_fraction,
        });
    }

    if totals.decisions >= config.min_decisions_for_rate
        && totals.escalation_rate > config.escalation_rate_ceiling
    {
        breaches.push(BudgetBreach {
            alert_type: AlertType::EscalationRate,
            current: totals.escalation_rate,
            threshold: config.escalation_rate_ceiling,
        });
    }

    if totals.projected_monthly > config.monthly_budget {
        breaches.push(BudgetBreach {
            alert_type: AlertType::ProjectedMonthlyOverrun,
            current: totals.projected_monthly,
            threshold: config.monthly_budget,
        });
    }

    breaches
}

/// Outcome of one enforcer tick
#[derive(Debug, Clone)]
pub struct TickReport {
    pub totals: RollingTotals,
    pub alerts: Vec<BudgetAlert>,
    pub snapshot: Arc<ControlSnapshot>,
    /// Whether a different snapshot was published this tick
    pub changed: bool,
}

/// Periodic budget enforcement loop
pub struct BudgetEnforcer {
    ledger: SharedCostLedger,
    control: SharedControlPlane,
    criteria: CriteriaConfig,
    config: BudgetConfig,
    events: SharedEventBus,
    audit: AuditLog,
    history: Mutex<VecDeque<BudgetAlert>>,
}

impl BudgetEnforcer {
    pub fn new(
        ledger: SharedCostLedger,
        control: SharedControlPlane,
        criteria: CriteriaConfig,
        config: BudgetConfig,
        events: SharedEventBus,
        audit: AuditLog,
    ) -> Self {
        Self {
            ledger,
            control,
            criteria,
            config,
            events,
            audit,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Evaluate the ledger as of `now` and publish the resulting controls
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let totals = self.ledger.totals_at(now).await;
        let breaches = detect_breaches(&totals, &self.config);
        let current = self.control.current();

        let mut next = ControlSnapshot::baseline(&self.criteria, &self.config);
        next.escalation_rate = totals.escalation_rate;
        next.generation = current.generation;

        let mut alerts = Vec::with_capacity(breaches.len());
        for breach in &breaches {
            let action = breach.action(&self.config);
            action.apply(&mut next);
            alerts.push(BudgetAlert {
                id: Uuid::new_v4(),
                alert_type: breach.alert_type,
                severity: breach.severity(),
                current_value: breach.current,
                threshold: breach.threshold,
                recommended_action: action.recommendation(),
                action,
                raised_at: now,
            });
        }

        let changed = next != *current;
        let snapshot = if changed {
            next.generation = current.generation + 1;
            info!(
                generation = next.generation,
                cutoff = next.cutoff,
                rate_limiting = next.rate_limiting,
                cost_saving = next.cost_saving_mode,
                escalation_rate = next.escalation_rate,
                "Control snapshot updated"
            );
            let published = Arc::new(next);
            self.control.publish((*published).clone());
            self.events.publish(RouterEvent::ControlsUpdated {
                snapshot: (*published).clone(),
                timestamp: now,
            });
            published
        } else {
            current
        };

        for alert in &alerts {
            warn!(
                alert_type = %alert.alert_type,
                severity = ?alert.severity,
                current = alert.current_value,
                threshold = alert.threshold,
                action = %alert.recommended_action,
                "Budget alert"
            );
            self.events.publish(RouterEvent::BudgetAlertRaised {
                alert: alert.clone(),
            });
            self.audit.record(AuditEntry::BudgetAlert {
                alert: alert.clone(),
            });
        }
        self.remember(&alerts);

        let pruned = self.ledger.compact_at(now).await;
        if pruned > 0 {
            tracing::debug!(pruned, "Ledger compacted");
        }

        TickReport {
            totals,
            alerts,
            snapshot,
            changed,
        }
    }

    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// Tick on the configured interval until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(tick_secs = self.config.tick_secs, "Budget enforcer started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let span = otel::budget_tick_span();
                    let report = self.tick().instrument(span.clone()).await;
                    otel::record_budget_tick(&span, &report);
                }
            }
        }

        info!("Budget enforcer stopped");
    }

    /// Recent alerts, oldest first
    pub fn alert_history(&self) -> Vec<BudgetAlert> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn control(&self) -> &SharedControlPlane {
        &self.control
    }

    fn remember(&self, alerts: &[BudgetAlert]) {
        if alerts.is_empty() {
            return;
        }
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        for alert in alerts {
            history.push_back(alert.clone());
        }
        while history.len() > self.config.alert_history {
            history.pop_front();
        }
    }
}
