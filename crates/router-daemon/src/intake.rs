//! JSONL task intake
//!
//! One command per line on the input, one reply per line on the output:
//!
//! ```text
//! {"op":"route","context":{...}}
//! {"op":"execute","context":{...},"payload":{"prompt":"..."}}
//! {"op":"review","request_id":"...","approver":"tech-lead","approve":true,"reason":"..."}
//! {"op":"status","request_id":"..."}
//! ```
//!
//! Route and execute commands may wait on approvers, so each runs as its own
//! task and replies when it resolves. Review and status reply inline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use router_core::approval::EscalationRequest;
use router_core::{EscalationRouter, RoutedExecution, RoutingError, RoutingOutcome, TaskContext};

/// How long in-flight executions get to record their outcome after shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// One intake line
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Decide and wait for approval when the decision escalates
    Route { context: TaskContext },
    /// Route, then run the payload on the resolved tier
    Execute {
        context: TaskContext,
        #[serde(default)]
        payload: Value,
    },
    /// Approver decision on an escalation request
    Review {
        request_id: Uuid,
        approver: String,
        approve: bool,
        #[serde(default)]
        reason: String,
    },
    /// Current copy of an escalation request
    Status { request_id: Uuid },
}

/// One output line
#[derive(Debug, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Routed {
        task_id: String,
        outcome: RoutingOutcome,
    },
    Executed {
        task_id: String,
        routed: Box<RoutedExecution>,
    },
    Reviewed {
        request: Box<EscalationRequest>,
    },
    Status {
        request_id: Uuid,
        request: Option<Box<EscalationRequest>>,
    },
    Error {
        task_id: Option<String>,
        code: &'static str,
        message: String,
        retryable: bool,
    },
}

impl Reply {
    fn failed(task_id: Option<String>, error: &RoutingError) -> Self {
        Self::Error {
            task_id,
            code: error.code(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }

    fn invalid(error: &serde_json::Error) -> Self {
        Self::Error {
            task_id: None,
            code: "INVALID_COMMAND",
            message: error.to_string(),
            retryable: false,
        }
    }
}

/// Read commands until the input ends or `cancel` fires; returns the number of lines handled
pub async fn serve<R>(
    router: Arc<EscalationRouter>,
    input: R,
    replies: mpsc::UnboundedSender<Reply>,
    cancel: CancellationToken,
) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut inflight = JoinSet::new();
    let mut handled = 0u64;

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "Intake task ended abnormally");
                }
                continue;
            }
            line = lines.next_line() => line.context("reading intake line")?,
        };
        let Some(line) = line else {
            debug!("Intake input closed");
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        handled += 1;

        match serde_json::from_str::<Command>(line) {
            Ok(command) => dispatch(&router, command, &replies, &mut inflight, &cancel),
            Err(e) => {
                warn!(error = %e, "Rejected intake line");
                let _ = replies.send(Reply::invalid(&e));
            }
        }
    }

    // Input ended: let pending work finish unless shutdown was requested
    if !cancel.is_cancelled() {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = inflight.join_next() => if next.is_none() { break },
            }
        }
    }
    if !inflight.is_empty() {
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while inflight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            info!(remaining = inflight.len(), "Abandoning intake tasks still waiting");
            inflight.shutdown().await;
        }
    }
    Ok(handled)
}

fn dispatch(
    router: &Arc<EscalationRouter>,
    command: Command,
    replies: &mpsc::UnboundedSender<Reply>,
    inflight: &mut JoinSet<()>,
    cancel: &CancellationToken,
) {
    match command {
        Command::Route { context } => {
            let router = router.clone();
            let replies = replies.clone();
            inflight.spawn(async move {
                let task_id = context.task_id.clone();
                let reply = match router.route(context).await {
                    Ok(outcome) => Reply::Routed { task_id, outcome },
                    Err(e) => Reply::failed(Some(task_id), &e),
                };
                let _ = replies.send(reply);
            });
        }
        Command::Execute { context, payload } => {
            let router = router.clone();
            let replies = replies.clone();
            let cancel = cancel.child_token();
            inflight.spawn(async move {
                let task_id = context.task_id.clone();
                let reply = match router.route_and_execute(context, payload, &cancel).await {
                    Ok(routed) => Reply::Executed {
                        task_id,
                        routed: Box::new(routed),
                    },
                    Err(e) => Reply::failed(Some(task_id), &e),
                };
                let _ = replies.send(reply);
            });
        }
        Command::Review {
            request_id,
            approver,
            approve,
            reason,
        } => {
            let reply = match router.review_request(request_id, &approver, approve, reason) {
                Ok(request) => Reply::Reviewed {
                    request: Box::new(request),
                },
                Err(e) => Reply::failed(None, &e),
            };
            let _ = replies.send(reply);
        }
        Command::Status { request_id } => {
            let _ = replies.send(Reply::Status {
                request_id,
                request: router.request_status(request_id).map(Box::new),
            });
        }
    }
}

/// Write replies as JSON lines until every sender is gone
pub async fn write_replies<W>(mut replies: mpsc::UnboundedReceiver<Reply>, mut output: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = replies.recv().await {
        let mut line = serde_json::to_vec(&reply).context("serializing reply")?;
        line.push(b'\n');
        output.write_all(&line).await.context("writing reply")?;
        output.flush().await.context("flushing reply")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use router_core::config::RouterConfig;
    use router_core::{ModelTier, ProviderAdapter, ProviderError, ProviderResponse};
    use tokio::io::BufReader;

    struct Fixed;

    #[async_trait]
    impl ProviderAdapter for Fixed {
        fn id(&self) -> &str {
            "primary"
        }

        async fn invoke(&self, _model: &str, _payload: &Value) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse::new("pub fn ping() -> &'static str { \"pong\" }").with_usage(12, 8, 0.004))
        }
    }

    fn router() -> Arc<EscalationRouter> {
        Arc::new(
            EscalationRouter::builder(RouterConfig::default())
                .provider(Arc::new(Fixed))
                .build(),
        )
    }

    fn drain(mut rx: mpsc::UnboundedReceiver<Reply>) -> Vec<Reply> {
        let mut replies = Vec::new();
        while let Ok(reply) = rx.try_recv() {
            replies.push(reply);
        }
        replies
    }

    #[tokio::test]
    async fn test_route_status_and_bad_lines() {
        let router = router();
        let unknown = Uuid::new_v4();
        let input = format!(
            "{}\n\nnot json\n{}\n",
            r#"{"op":"route","context":{"task_id":"t-1","affected_services":1,"security_impact":"none","performance_multiplier":1.0,"complexity":0.2}}"#,
            serde_json::json!({"op": "status", "request_id": unknown}),
        );
        let (tx, rx) = mpsc::unbounded_channel();

        let handled = serve(router, BufReader::new(input.as_bytes()), tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(handled, 3);

        let replies = drain(rx);
        assert_eq!(replies.len(), 3);
        assert!(replies.iter().any(|r| matches!(
            r,
            Reply::Routed { task_id, outcome } if task_id == "t-1" && outcome.tier == ModelTier::Standard
        )));
        assert!(replies
            .iter()
            .any(|r| matches!(r, Reply::Error { code: "INVALID_COMMAND", .. })));
        assert!(replies.iter().any(|r| matches!(
            r,
            Reply::Status { request_id, request: None } if *request_id == unknown
        )));
    }

    #[tokio::test]
    async fn test_execute_lands_in_router_ledger() {
        let router = router();
        let input = r#"{"op":"execute","context":{"task_id":"t-exec","affected_services":1,"security_impact":"none","performance_multiplier":1.0,"complexity":0.0},"payload":{"prompt":"ping"}}"#;
        let (tx, rx) = mpsc::unbounded_channel();

        serve(router.clone(), BufReader::new(input.as_bytes()), tx, CancellationToken::new())
            .await
            .unwrap();

        let replies = drain(rx);
        match &replies[..] {
            [Reply::Executed { task_id, routed }] => {
                assert_eq!(task_id, "t-exec");
                assert_eq!(routed.result.provider, "primary");
            }
            other => panic!("unexpected replies: {other:?}"),
        }
        let totals = router.ledger().totals().await;
        assert_eq!(totals.daily.records, 1);
        assert!((totals.daily.cost - 0.004).abs() < 1e-12);
        assert_eq!(totals.decisions, 1);

        // the enforcer ticks over the same ledger
        let report = router.enforcer().tick().await;
        assert_eq!(report.totals.daily.records, 1);
        assert_eq!(report.totals.decisions, 1);
    }

    #[tokio::test]
    async fn test_review_resolves_waiting_route() {
        let router = router();
        let (mut client, server) = tokio::io::duplex(4096);
        let (tx, rx) = mpsc::unbounded_channel();
        let intake = tokio::spawn(serve(
            router.clone(),
            BufReader::new(server),
            tx,
            CancellationToken::new(),
        ));

        client
            .write_all(
                br#"{"op":"route","context":{"task_id":"t-sec","affected_services":1,"security_impact":"auth_bypass","performance_multiplier":1.0,"complexity":0.0}}
"#,
            )
            .await
            .unwrap();

        let request_id = loop {
            if let Some(request) = router.approvals().list_pending().first() {
                break request.id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        let review = serde_json::json!({
            "op": "review",
            "request_id": request_id,
            "approver": "tech-lead",
            "approve": true,
            "reason": "auth change reviewed",
        });
        client
            .write_all(format!("{}\n", review).as_bytes())
            .await
            .unwrap();
        drop(client);

        assert_eq!(intake.await.unwrap().unwrap(), 2);
        let replies = drain(rx);
        assert!(replies
            .iter()
            .any(|r| matches!(r, Reply::Reviewed { request } if request.id == request_id)));
        assert!(replies.iter().any(|r| matches!(
            r,
            Reply::Routed { outcome, .. } if outcome.tier == ModelTier::Premium
        )));
    }

    #[tokio::test]
    async fn test_replies_are_json_lines() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Reply::Status {
            request_id: Uuid::nil(),
            request: None,
        })
        .unwrap();
        drop(tx);

        let mut out = Vec::new();
        write_replies(rx, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        let value: Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["reply"], "status");
        assert!(value["request"].is_null());
        assert!(text.ends_with('\n'));
    }
}
