//! Write-behind audit log
//!
//! Callers hand records to an unbounded channel and return immediately; a
//! background task appends them to a JSONL file. [`AuditLog::replay`] reads
//! the file back for post-incident review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::approval::EscalationRequest;
use crate::cost::enforcer::BudgetAlert;
use crate::cost::ledger::CostRecord;
use crate::escalation::EscalationDecision;

/// Audit log errors
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed audit entry at line {line}: {source}")]
    Malformed {
        line: usize,
        source: serde_json::Error,
    },
}

/// What an audit line records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEntry {
    Decision {
        decision: EscalationDecision,
    },
    EscalationClosed {
        request: Box<EscalationRequest>,
    },
    Execution {
        record: CostRecord,
        attempted: Vec<String>,
    },
    BudgetAlert {
        alert: BudgetAlert,
    },
}

impl AuditEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decision { .. } => "decision",
            Self::EscalationClosed { .. } => "escalation_closed",
            Self::Execution { .. } => "execution",
            Self::BudgetAlert { .. } => "budget_alert",
        }
    }
}

/// One line of the audit file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub entry: AuditEntry,
}

/// Cloneable handle to the audit writer
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    sender: Option<mpsc::UnboundedSender<AuditRecord>>,
}

impl AuditLog {
    /// A handle that drops every record
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Open `path` for appending and start the writer task.
    ///
    /// The writer drains until every handle is dropped, then flushes and
    /// exits; await the returned handle to make sure the tail is on disk.
    pub async fn spawn(path: impl AsRef<Path>) -> Result<(Self, JoinHandle<()>), AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| AuditError::Io {
                path: path.clone(),
                source,
            })?;

        let (sender, mut receiver) = mpsc::unbounded_channel::<AuditRecord>();
        let handle = tokio::spawn(async move {
            let mut writer = BufWriter::new(file);
            let mut written: u64 = 0;
            while let Some(record) = receiver.recv().await {
                write_record(&mut writer, &record, &path).await;
                written += 1;
                // Flush once the backlog is drained
                while let Ok(next) = receiver.try_recv() {
                    write_record(&mut writer, &next, &path).await;
                    written += 1;
                }
                if let Err(e) = writer.flush().await {
                    error!(path = %path.display(), error = %e, "Audit log flush failed");
                }
            }
            if let Err(e) = writer.flush().await {
                error!(path = %path.display(), error = %e, "Audit log flush failed");
            }
            debug!(path = %path.display(), written, "Audit writer stopped");
        });

        Ok((
            Self {
                sender: Some(sender),
            },
            handle,
        ))
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Queue an entry; never blocks
    pub fn record(&self, entry: AuditEntry) {
        let Some(sender) = &self.sender else {
            return;
        };
        let kind = entry.kind();
        let record = AuditRecord {
            recorded_at: Utc::now(),
            entry,
        };
        if sender.send(record).is_err() {
            warn!(kind, "Audit writer has stopped; entry dropped");
        }
    }

    /// Read every entry back from an audit file
    pub async fn replay(path: impl AsRef<Path>) -> Result<Vec<AuditRecord>, AuditError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| AuditError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|source| AuditError::Malformed {
                    line: idx + 1,
                    source,
                })
            })
            .collect()
    }
}

async fn write_record(writer: &mut BufWriter<tokio::fs::File>, record: &AuditRecord, path: &Path) {
    let mut line = match serde_json::to_vec(record) {
        Ok(line) => line,
        Err(e) => {
            error!(kind = record.entry.kind(), error = %e, "Failed to serialize audit entry");
            return;
        }
    };
    line.push(b'\n');
    if let Err(e) = writer.write_all(&line).await {
        error!(path = %path.display(), error = %e, "Audit log write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;
    use crate::cost::control::ControlSnapshot;
    use crate::escalation::EscalationEngine;

    fn decision(task_id: &str) -> EscalationDecision {
        EscalationEngine::new()
            .decide(&TaskContext::new(task_id), &ControlSnapshot::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_then_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let (log, writer) = AuditLog::spawn(&path).await.unwrap();
        log.record(AuditEntry::Decision {
            decision: decision("t-1"),
        });
        log.record(AuditEntry::Decision {
            decision: decision("t-2"),
        });
        drop(log);
        writer.await.unwrap();

        let records = AuditLog::replay(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        match &records[1].entry {
            AuditEntry::Decision { decision } => assert_eq!(decision.task_id, "t-2"),
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_appends_across_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        for id in ["a", "b"] {
            let (log, writer) = AuditLog::spawn(&path).await.unwrap();
            log.record(AuditEntry::Decision {
                decision: decision(id),
            });
            drop(log);
            writer.await.unwrap();
        }

        assert_eq!(AuditLog::replay(&path).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_replay_reports_malformed_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        tokio::fs::write(&path, "{\"kind\":\"nope\"}\n").await.unwrap();

        let err = AuditLog::replay(&path).await.unwrap_err();
        assert!(matches!(err, AuditError::Malformed { line: 1, .. }));
    }

    #[test]
    fn test_disabled_log_drops_silently() {
        let log = AuditLog::disabled();
        assert!(!log.is_enabled());
        log.record(AuditEntry::Decision {
            decision: decision("t"),
        });
    }
}
