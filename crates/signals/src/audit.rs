//! Audit sinks.
//!
//! `record` never blocks the decision path. The JSONL sink hands records to
//! a background writer through a bounded queue and counts what it has to
//! drop; the memory sink keeps everything for tests and replay reports.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use signalscan_core::{AuditRecord, AuditSink, CandidateSignal, DecisionRecord, EngineMetrics};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::throttle::LogThrottle;

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    #[must_use]
    pub fn candidates(&self) -> Vec<CandidateSignal> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                AuditRecord::Candidate(c) => Some(c.clone()),
                AuditRecord::Decision(_) => None,
            })
            .collect()
    }

    #[must_use]
    pub fn decisions(&self) -> Vec<DecisionRecord> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                AuditRecord::Decision(d) => Some(d.clone()),
                AuditRecord::Candidate(_) => None,
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        self.records.lock().push(record);
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _record: AuditRecord) {}
}

/// Appends records as JSON lines from a background writer task.
pub struct JsonlAuditSink {
    tx: Mutex<Option<mpsc::Sender<AuditRecord>>>,
    metrics: Arc<EngineMetrics>,
    drop_log: LogThrottle,
}

impl JsonlAuditSink {
    /// Opens `path` for appending and starts the writer task.
    ///
    /// The task ends after [`AuditSink::flush`] once the queue is drained and
    /// returns the number of records written.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn spawn(
        path: impl AsRef<Path>,
        capacity: usize,
        metrics: Arc<EngineMetrics>,
    ) -> Result<(Arc<Self>, JoinHandle<Result<u64>>)> {
        let path = path.as_ref();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open audit log {}", path.display()))?;

        let (tx, mut rx) = mpsc::channel::<AuditRecord>(capacity.max(1));
        let path_label = path.display().to_string();
        let handle = tokio::spawn(async move {
            let mut writer = tokio::io::BufWriter::new(tokio::fs::File::from_std(file));
            let mut written = 0u64;
            while let Some(record) = rx.recv().await {
                let mut line = serde_json::to_vec(&record).context("Failed to serialize audit record")?;
                line.push(b'\n');
                writer.write_all(&line).await?;
                written += 1;
            }
            writer.flush().await?;
            tracing::debug!(path = %path_label, records = written, "Audit writer finished");
            Ok::<u64, anyhow::Error>(written)
        });

        let sink = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            metrics,
            drop_log: LogThrottle::per_second(1),
        });
        Ok((sink, handle))
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, record: AuditRecord) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            EngineMetrics::incr(&self.metrics.audit_dropped);
            return;
        };
        match tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                EngineMetrics::incr(&self.metrics.audit_dropped);
                if let Some(suppressed) = self.drop_log.allow() {
                    tracing::warn!(suppressed_logs = suppressed, "Audit queue full, dropping record");
                }
            }
            Err(TrySendError::Closed(_)) => {
                EngineMetrics::incr(&self.metrics.audit_dropped);
            }
        }
    }

    fn flush(&self) {
        self.tx.lock().take();
    }
}
