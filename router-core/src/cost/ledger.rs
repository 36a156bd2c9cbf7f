//! Cost ledger: Append-only spend accounting with rolling windows
//!
//! Every execution outcome lands here as a [`CostRecord`]; every routing
//! decision lands here as an escalated/not-escalated mark. The budget enforcer
//! reads rolling totals each tick.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::tier::ModelTier;

/// Length of the daily window
pub const DAILY_WINDOW_HOURS: i64 = 24;
/// Length of the weekly window
pub const WEEKLY_WINDOW_DAYS: i64 = 7;
/// Length of the monthly window (and record retention)
pub const MONTHLY_WINDOW_DAYS: i64 = 30;

/// How an execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostOutcome {
    Success,
    QualityDowngrade,
    ProviderExhaustion,
    Cancelled,
}

impl std::fmt::Display for CostOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::QualityDowngrade => write!(f, "quality_downgrade"),
            Self::ProviderExhaustion => write!(f, "provider_exhaustion"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub tier: ModelTier,
    pub model: String,
    /// Provider that served the final attempt, if any
    pub provider: Option<String>,
    /// Provider calls that consumed usage
    pub requests: u32,
    pub input_units: u64,
    pub output_units: u64,
    pub cost_amount: f64,
    pub outcome: CostOutcome,
}

impl CostRecord {
    /// Zero-usage record
    pub fn new(
        task_id: impl Into<String>,
        tier: ModelTier,
        model: impl Into<String>,
        outcome: CostOutcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            task_id: task_id.into(),
            tier,
            model: model.into(),
            provider: None,
            requests: 0,
            input_units: 0,
            output_units: 0,
            cost_amount: 0.0,
            outcome,
        }
    }

    pub fn with_usage(mut self, requests: u32, input_units: u64, output_units: u64, cost: f64) -> Self {
        self.requests = requests;
        self.input_units = input_units;
        self.output_units = output_units;
        self.cost_amount = cost;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Sums over one window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowTotals {
    pub records: usize,
    pub requests: u64,
    pub input_units: u64,
    pub output_units: u64,
    pub cost: f64,
}

impl WindowTotals {
    fn add(&mut self, record: &CostRecord) {
        self.records += 1;
        self.requests += u64::from(record.requests);
        self.input_units += record.input_units;
        self.output_units += record.output_units;
        self.cost += record.cost_amount;
    }
}

/// Rolling view of the ledger at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingTotals {
    pub as_of: DateTime<Utc>,
    pub daily: WindowTotals,
    pub weekly: WindowTotals,
    pub monthly: WindowTotals,
    /// Decisions inside the escalation window
    pub decisions: u64,
    pub escalated: u64,
    pub escalation_rate: f64,
    /// Weekly spend extrapolated to thirty days
    pub projected_monthly: f64,
}

#[derive(Debug, Clone, Copy)]
struct DecisionMark {
    at: DateTime<Utc>,
    escalated: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    records: Vec<CostRecord>,
    decisions: VecDeque<DecisionMark>,
}

/// Shared reference to the ledger
pub type SharedCostLedger = Arc<CostLedger>;

/// Append-only cost accumulator
pub struct CostLedger {
    state: RwLock<LedgerState>,
    escalation_window: Duration,
}

impl CostLedger {
    pub fn new(escalation_window: Duration) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            escalation_window,
        }
    }

    pub fn shared(self) -> SharedCostLedger {
        Arc::new(self)
    }

    /// Append one record
    pub async fn record(&self, record: CostRecord) {
        tracing::debug!(
            task_id = %record.task_id,
            tier = %record.tier,
            outcome = %record.outcome,
            cost = record.cost_amount,
            "ledger record"
        );
        self.state.write().await.records.push(record);
    }

    /// Append several records under one lock
    pub async fn record_batch(&self, records: impl IntoIterator<Item = CostRecord>) {
        self.state.write().await.records.extend(records);
    }

    /// Count a routing decision toward the escalation rate
    pub async fn record_decision(&self, escalated: bool) {
        self.record_decision_at(escalated, Utc::now()).await;
    }

    pub async fn record_decision_at(&self, escalated: bool, at: DateTime<Utc>) {
        self.state
            .write()
            .await
            .decisions
            .push_back(DecisionMark { at, escalated });
    }

    /// Rolling totals as of `now`
    pub async fn totals_at(&self, now: DateTime<Utc>) -> RollingTotals {
        let state = self.state.read().await;

        let day_start = now - Duration::hours(DAILY_WINDOW_HOURS);
        let week_start = now - Duration::days(WEEKLY_WINDOW_DAYS);
        let month_start = now - Duration::days(MONTHLY_WINDOW_DAYS);

        let mut daily = WindowTotals::default();
        let mut weekly = WindowTotals::default();
        let mut monthly = WindowTotals::default();
        for record in state.records.iter().filter(|r| r.timestamp <= now) {
            if record.timestamp > month_start {
                monthly.add(record);
            }
            if record.timestamp > week_start {
                weekly.add(record);
            }
            if record.timestamp > day_start {
                daily.add(record);
            }
        }

        let (decisions, escalated) = Self::count_decisions(&state, now, self.escalation_window);
        let escalation_rate = if decisions == 0 {
            0.0
        } else {
            escalated as f64 / decisions as f64
        };
        let projected_monthly = weekly.cost / WEEKLY_WINDOW_DAYS as f64 * MONTHLY_WINDOW_DAYS as f64;

        RollingTotals {
            as_of: now,
            daily,
            weekly,
            monthly,
            decisions,
            escalated,
            escalation_rate,
            projected_monthly,
        }
    }

    pub async fn totals(&self) -> RollingTotals {
        self.totals_at(Utc::now()).await
    }

    /// Escalated / total decisions in the trailing window, with the total
    pub async fn escalation_rate_at(&self, now: DateTime<Utc>) -> (f64, u64) {
        let state = self.state.read().await;
        let (total, escalated) = Self::count_decisions(&state, now, self.escalation_window);
        if total == 0 {
            (0.0, 0)
        } else {
            (escalated as f64 / total as f64, total)
        }
    }

    /// Weekly spend extrapolated to thirty days
    pub async fn projected_monthly_at(&self, now: DateTime<Utc>) -> f64 {
        self.totals_at(now).await.projected_monthly
    }

    /// All records for one task, oldest first
    pub async fn records_for(&self, task_id: &str) -> Vec<CostRecord> {
        let state = self.state.read().await;
        let mut records: Vec<CostRecord> = state
            .records
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);
        records
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop records past the monthly window and decisions past the escalation
    /// window. Returns how many entries were removed.
    pub async fn compact_at(&self, now: DateTime<Utc>) -> usize {
        let month_start = now - Duration::days(MONTHLY_WINDOW_DAYS);
        let decision_start = now - self.escalation_window;
        let mut state = self.state.write().await;

        let before = state.records.len() + state.decisions.len();
        state.records.retain(|r| r.timestamp > month_start);
        state.decisions.retain(|d| d.at > decision_start);
        before - (state.records.len() + state.decisions.len())
    }

    fn count_decisions(state: &LedgerState, now: DateTime<Utc>, window: Duration) -> (u64, u64) {
        let start = now - window;
        state
            .decisions
            .iter()
            .filter(|d| d.at > start && d.at <= now)
            .fold((0, 0), |(total, escalated), d| {
                (total + 1, escalated + u64::from(d.escalated))
            })
    }
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new(Duration::hours(DAILY_WINDOW_HOURS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spend(task: &str, cost: f64, at: DateTime<Utc>) -> CostRecord {
        CostRecord::new(task, ModelTier::Premium, "premium-reasoner", CostOutcome::Success)
            .with_usage(1, 100, 50, cost)
            .at(at)
    }

    #[tokio::test]
    async fn test_rolling_windows() {
        let ledger = CostLedger::default();
        let now = Utc::now();
        ledger
            .record_batch(vec![
                spend("a", 1.0, now - Duration::hours(1)),
                spend("b", 2.0, now - Duration::days(3)),
                spend("c", 4.0, now - Duration::days(20)),
                spend("d", 8.0, now - Duration::days(45)),
            ])
            .await;

        let totals = ledger.totals_at(now).await;
        assert_eq!(totals.daily.cost, 1.0);
        assert_eq!(totals.weekly.cost, 3.0);
        assert_eq!(totals.monthly.cost, 7.0);
        assert_eq!(totals.monthly.records, 3);
        assert_eq!(totals.daily.input_units, 100);
        assert!((totals.projected_monthly - 3.0 / 7.0 * 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_escalation_rate_over_window() {
        let ledger = CostLedger::default();
        let now = Utc::now();
        for i in 0..10 {
            ledger
                .record_decision_at(i < 4, now - Duration::minutes(i))
                .await;
        }
        // outside the 24h window
        ledger
            .record_decision_at(true, now - Duration::hours(30))
            .await;

        let (rate, total) = ledger.escalation_rate_at(now).await;
        assert_eq!(total, 10);
        assert!((rate - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_ledger() {
        let ledger = CostLedger::default();
        assert!(ledger.is_empty().await);
        let totals = ledger.totals().await;
        assert_eq!(totals.escalation_rate, 0.0);
        assert_eq!(totals.projected_monthly, 0.0);
    }

    #[tokio::test]
    async fn test_records_for_task() {
        let ledger = CostLedger::default();
        let now = Utc::now();
        ledger.record(spend("x", 1.0, now)).await;
        ledger.record(spend("y", 1.0, now)).await;
        ledger
            .record(spend("x", 0.5, now - Duration::minutes(5)))
            .await;

        let records = ledger.records_for("x").await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cost_amount, 0.5);
    }

    #[tokio::test]
    async fn test_compaction_drops_expired_entries() {
        let ledger = CostLedger::default();
        let now = Utc::now();
        ledger.record(spend("old", 1.0, now - Duration::days(31))).await;
        ledger.record(spend("new", 1.0, now)).await;
        ledger
            .record_decision_at(true, now - Duration::hours(25))
            .await;

        assert_eq!(ledger.compact_at(now).await, 2);
        assert_eq!(ledger.len().await, 1);
    }
}
