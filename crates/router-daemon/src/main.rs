//! Tier router daemon
//!
//! Builds one [`EscalationRouter`] and runs everything against it: the JSONL
//! task intake on stdin/stdout, the provider health monitor, the budget
//! enforcer, the approval pruner and the audit writer. Runs until Ctrl-C.

mod intake;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::io::BufReader;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use router_core::cost::{ControlSnapshot, RollingTotals};
use router_core::events::{AuditLog, EventBus, EventBusExt, EventFilter, RouterEvent, SharedEventBus};
use router_core::health::{HealthMonitor, HealthTable, ProviderHealth};
use router_core::{EscalationRouter, HttpAdapter, RouterConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the router TOML config (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Audit log path (overrides the config file and ROUTER_AUDIT_LOG)
    #[arg(long)]
    audit_log: Option<PathBuf>,

    /// Probe every provider and tick the enforcer once, print a JSON summary, then exit
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Only log these event types (repeatable, e.g. budget_alert_raised)
    #[arg(long = "event-type")]
    event_types: Vec<String>,

    /// Do not read task commands from stdin
    #[arg(long, default_value_t = false)]
    no_intake: bool,
}

impl Args {
    fn event_filter(&self) -> EventFilter {
        if self.event_types.is_empty() {
            EventFilter::new()
        } else {
            EventFilter::new().types(self.event_types.iter().map(String::as_str).collect())
        }
    }
}

/// What `--once` prints
#[derive(Debug, Serialize)]
struct Summary {
    providers: Vec<String>,
    health: Vec<ProviderHealth>,
    totals: RollingTotals,
    controls: ControlSnapshot,
}

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building Tokio runtime")?;
    let result = runtime.block_on(run());
    // A stdin read parked on a blocking thread must not hold the process open
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = RouterConfig::load(args.config.as_deref()).with_context(|| {
        format!(
            "loading router config from {}",
            args.config
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults".to_string())
        )
    })?;
    if let Some(path) = args.audit_log.clone() {
        config.audit.path = Some(path);
    }

    let (audit, writer) = match &config.audit.path {
        Some(path) => {
            let (audit, handle) = AuditLog::spawn(path)
                .await
                .with_context(|| format!("opening audit log {}", path.display()))?;
            info!(path = %path.display(), "Audit log enabled");
            (audit, Some(handle))
        }
        None => (AuditLog::disabled(), None),
    };

    let events = EventBus::new().shared();
    let providers = HttpAdapter::registry(&config.health.endpoints, &config.execution)
        .context("building provider adapters")?;
    let provider_ids = providers.ids();
    let router = Arc::new(
        EscalationRouter::builder(config.clone())
            .providers(providers)
            .events(events.clone())
            .health_table(HealthTable::new().shared())
            .audit(audit.clone())
            .build(),
    );
    drop(audit);

    let monitor = Arc::new(
        HealthMonitor::http_from_config(
            &config.health,
            &config.execution,
            router.health().clone(),
            events.clone(),
        )
        .context("building health monitor")?,
    );

    info!(
        providers = ?provider_ids,
        targets = monitor.targets().len(),
        daily_budget = config.budget.daily_budget,
        monthly_budget = config.budget.monthly_budget,
        cutoff = config.criteria.cutoff,
        "Tier router starting"
    );

    if args.once {
        monitor.run_once().await;
        let report = router.enforcer().tick().await;
        let summary = Summary {
            providers: provider_ids,
            health: router.health().snapshot(),
            totals: report.totals,
            controls: (*report.snapshot).clone(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("serializing summary")?
        );
    } else {
        let cancel = CancellationToken::new();
        let logger = tokio::spawn(log_events(events.clone(), args.event_filter(), cancel.clone()));
        let probes = monitor.clone().spawn(cancel.clone());
        let budget = router.spawn_enforcer(cancel.clone());
        let pruner = router.spawn_approval_pruner(cancel.clone());

        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let replies = tokio::spawn(intake::write_replies(replies_rx, tokio::io::stdout()));
        let intake = if args.no_intake {
            drop(replies_tx);
            None
        } else {
            Some(tokio::spawn(intake::serve(
                router.clone(),
                BufReader::new(tokio::io::stdin()),
                replies_tx,
                cancel.clone(),
            )))
        };

        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?;
        info!("Shutdown requested");
        cancel.cancel();

        if let Some(intake) = intake {
            let handled = intake.await.context("intake task")??;
            info!(handled, "Intake stopped");
        }
        replies.await.context("reply writer task")??;
        for handle in probes {
            if let Err(e) = handle.await {
                warn!(error = %e, "Health check task ended abnormally");
            }
        }
        budget.await.context("budget enforcer task")?;
        pruner.await.context("approval pruner task")?;
        logger.await.context("event logger task")?;
    }

    router.shutdown();
    // Writer exits once the last audit handle is gone
    drop(monitor);
    drop(router);
    if let Some(writer) = writer {
        writer.await.context("flushing audit log")?;
    }
    info!("Tier router stopped");
    Ok(())
}

/// Log matching events from the feed until cancelled
async fn log_events(events: SharedEventBus, filter: EventFilter, cancel: CancellationToken) {
    let mut rx = events.subscribe_filtered(filter);
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(RouterEvent::BudgetAlertRaised { alert }) => warn!(
                alert_type = %alert.alert_type,
                severity = ?alert.severity,
                current = alert.current_value,
                threshold = alert.threshold,
                action = %alert.recommended_action,
                "Budget alert"
            ),
            Ok(RouterEvent::ControlsUpdated { snapshot, .. }) => info!(
                generation = snapshot.generation,
                cutoff = snapshot.cutoff,
                rate_limiting = snapshot.rate_limiting,
                cost_saving = snapshot.cost_saving_mode,
                "Routing controls updated"
            ),
            Ok(event) => debug!(event_type = event.event_type(), "Router event"),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event logger lagged behind the feed")
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["router-daemon"]).unwrap();
        assert!(args.config.is_none());
        assert!(!args.once);
        assert!(!args.no_intake);
        assert!(args.event_types.is_empty());
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::try_parse_from([
            "router-daemon",
            "--config",
            "router.toml",
            "--audit-log",
            "/var/log/router/audit.jsonl",
            "--once",
            "--event-type",
            "budget_alert_raised",
            "--event-type",
            "controls_updated",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("router.toml")));
        assert_eq!(
            args.audit_log,
            Some(PathBuf::from("/var/log/router/audit.jsonl"))
        );
        assert!(args.once);

        let filter = args.event_filter();
        let controls = RouterEvent::ControlsUpdated {
            snapshot: ControlSnapshot::default(),
            timestamp: chrono::Utc::now(),
        };
        assert!(filter.matches(&controls));
        assert_eq!(args.event_types.len(), 2);
    }

    #[tokio::test]
    async fn test_event_logger_stops_on_cancel() {
        let events = EventBus::new().shared();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(log_events(
            events.clone(),
            EventFilter::new().types(vec!["controls_updated"]),
            cancel.clone(),
        ));
        events.publish(RouterEvent::ControlsUpdated {
            snapshot: ControlSnapshot::default(),
            timestamp: chrono::Utc::now(),
        });
        cancel.cancel();
        handle.await.unwrap();
    }
}
