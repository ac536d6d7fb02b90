//! Append-only decision log.
//!
//! [`JsonlAuditSink`] hands encoded events to a background writer through a
//! bounded channel, so `emit` only waits when the writer falls behind. A write
//! failure is remembered and returned from every later `emit` and `flush`.

use crate::error::AuditError;
use crate::models::PlacementDecision;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tracing::error;

#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, decision: &PlacementDecision) -> Result<(), AuditError>;

    /// Waits until every emitted event is durably written.
    async fn flush(&self) -> Result<(), AuditError>;
}

enum AuditCommand {
    Record(String),
    Flush(oneshot::Sender<()>),
}

pub struct JsonlAuditSink {
    path: PathBuf,
    tx: mpsc::Sender<AuditCommand>,
    failure: Arc<Mutex<Option<String>>>,
}

impl JsonlAuditSink {
    pub async fn open(path: &Path) -> Result<Self, AuditError> {
        let write_err = |e: std::io::Error| AuditError::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(write_err)?;

        let (tx, rx) = mpsc::channel(256);
        let failure = Arc::new(Mutex::new(None));
        tokio::spawn(writer(BufWriter::new(file), rx, failure.clone(), path.to_path_buf()));
        Ok(Self {
            path: path.to_path_buf(),
            tx,
            failure,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check(&self) -> Result<(), AuditError> {
        let failed = self.failure.lock().unwrap_or_else(|p| p.into_inner()).clone();
        match failed {
            Some(message) => Err(AuditError::Write {
                path: self.path.clone(),
                message,
            }),
            None => Ok(()),
        }
    }
}

async fn writer(
    mut out: BufWriter<tokio::fs::File>,
    mut rx: mpsc::Receiver<AuditCommand>,
    failure: Arc<Mutex<Option<String>>>,
    path: PathBuf,
) {
    let mut failed = false;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            AuditCommand::Record(line) => {
                if failed {
                    continue;
                }
                if let Err(e) = out.write_all(line.as_bytes()).await {
                    error!(path = %path.display(), error = %e, "audit write failed");
                    failed = true;
                    record_failure(&failure, e.to_string());
                }
            }
            AuditCommand::Flush(done) => {
                if !failed {
                    let res = match out.flush().await {
                        Ok(()) => out.get_ref().sync_data().await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = res {
                        error!(path = %path.display(), error = %e, "audit flush failed");
                        failed = true;
                        record_failure(&failure, e.to_string());
                    }
                }
                let _ = done.send(());
            }
        }
    }
    if !failed {
        if let Err(e) = out.flush().await {
            error!(path = %path.display(), error = %e, "audit flush on close failed");
        }
    }
}

fn record_failure(slot: &Mutex<Option<String>>, message: String) {
    let mut guard = slot.lock().unwrap_or_else(|p| p.into_inner());
    guard.get_or_insert(message);
}

#[async_trait::async_trait]
impl AuditSink for JsonlAuditSink {
    async fn emit(&self, decision: &PlacementDecision) -> Result<(), AuditError> {
        self.check()?;
        let mut line = serde_json::to_string(decision)?;
        line.push('\n');
        self.tx
            .send(AuditCommand::Record(line))
            .await
            .map_err(|_| AuditError::Closed)
    }

    async fn flush(&self) -> Result<(), AuditError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(AuditCommand::Flush(done_tx))
            .await
            .map_err(|_| AuditError::Closed)?;
        done_rx.await.map_err(|_| AuditError::Closed)?;
        self.check()
    }
}

/// Keeps events in memory. Used by tests and embedders that collect
/// decisions themselves.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<PlacementDecision>>,
}

impl MemoryAuditSink {
    pub fn events(&self) -> Vec<PlacementDecision> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl AuditSink for MemoryAuditSink {
    async fn emit(&self, decision: &PlacementDecision) -> Result<(), AuditError> {
        self.events
            .lock()
            .map_err(|_| AuditError::Closed)?
            .push(decision.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecisionAction, ErrorCause, Fingerprint};

    fn decision(name: &str) -> PlacementDecision {
        PlacementDecision::error(
            PathBuf::from(format!("/in/{name}")),
            Some(Fingerprint::new("b3:00")),
            ErrorCause::MissingResponse,
        )
        .for_run("run-1")
    }

    #[tokio::test]
    async fn appends_one_json_line_per_event() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("audit/run-1.jsonl");
        let sink = JsonlAuditSink::open(&path).await.unwrap();
        sink.emit(&decision("a")).await.unwrap();
        sink.emit(&decision("b")).await.unwrap();
        sink.flush().await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<PlacementDecision> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].source_path, PathBuf::from("/in/b"));
        assert_eq!(lines[0].action, DecisionAction::SkipError);
    }

    #[tokio::test]
    async fn reopening_appends() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("run.jsonl");
        for name in ["a", "b"] {
            let sink = JsonlAuditSink::open(&path).await.unwrap();
            sink.emit(&decision(name)).await.unwrap();
            sink.flush().await.unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn unopenable_log_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let err = JsonlAuditSink::open(&blocker.join("nested.jsonl")).await;
        assert!(matches!(err, Err(AuditError::Write { .. })));
    }

    #[tokio::test]
    async fn memory_sink_collects() {
        let sink = MemoryAuditSink::default();
        sink.emit(&decision("a")).await.unwrap();
        assert_eq!(sink.events().len(), 1);
    }
}
