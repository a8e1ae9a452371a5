//! CLI commands for the signal engine.

pub mod check_config;
pub mod replay;
pub mod run;

pub use check_config::{run_check_config, CheckConfigArgs};
pub use replay::{run_replay, ReplayArgs};
pub use run::{run_live, RunArgs};

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use signalscan_core::{AuditSink, EngineMetrics};
use signalscan_signals::{JsonlAuditSink, NullAuditSink};
use tokio::task::JoinHandle;

/// Audit sink for a command, plus the writer task when auditing to a file.
pub(crate) type AuditHandle = (Arc<dyn AuditSink>, Option<JoinHandle<Result<u64>>>);

pub(crate) fn open_audit(path: Option<&Path>, capacity: usize, metrics: &Arc<EngineMetrics>) -> Result<AuditHandle> {
    match path {
        Some(path) => {
            let (sink, writer) = JsonlAuditSink::spawn(path, capacity, Arc::clone(metrics))?;
            tracing::info!(path = %path.display(), "Writing audit records");
            Ok((sink, Some(writer)))
        }
        None => Ok((Arc::new(NullAuditSink), None)),
    }
}

/// Waits for the audit writer after the sink has been flushed.
pub(crate) async fn finish_audit(writer: Option<JoinHandle<Result<u64>>>) -> Result<()> {
    if let Some(writer) = writer {
        let written = writer.await??;
        tracing::info!(records = written, "Audit log closed");
    }
    Ok(())
}
