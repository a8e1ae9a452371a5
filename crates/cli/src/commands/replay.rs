//! `replay` command: deterministic replay of a recorded event file.
//!
//! Runs the single-task engine, so the same file and configuration always
//! produce the same alerts. Emitted alerts are printed to stdout as JSON
//! lines, followed by the metrics report on stderr.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use signalscan_core::config_loader::DEFAULT_CONFIG_PATH;
use signalscan_core::{ConfigLoader, ConfigWatcher, DecisionRecord, EngineMetrics, MetricsFormatter};
use signalscan_signals::SignalEngine;

use crate::input::EventSource;

/// Arguments for the replay command.
#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Config file path
    #[arg(short, long, env = "SIGNALSCAN_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Recorded JSONL event file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Append candidate and decision audit records to this JSONL file
    #[arg(long)]
    pub audit: Option<PathBuf>,

    /// Print every decision (suppressed and audit-only included), not just alerts
    #[arg(long)]
    pub decisions: bool,

    /// Only print the metrics report
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn run_replay(args: ReplayArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)?;
    let audit_capacity = config.engine.audit_queue_capacity;
    let (_watcher, shared) = ConfigWatcher::new(config);
    let metrics = Arc::new(EngineMetrics::new());
    let (audit, audit_writer) = super::open_audit(args.audit.as_deref(), audit_capacity, &metrics)?;

    let mut engine = SignalEngine::new(shared, audit, Arc::clone(&metrics));
    let mut source = EventSource::open(Some(&args.input)).await?;
    tracing::info!(input = %args.input.display(), "Replaying events");

    let mut out = std::io::BufWriter::new(std::io::stdout());
    while let Some(event) = source.next_event().await? {
        match engine.process(&event).await {
            Ok(records) => print_records(&mut out, &records, &args)?,
            Err(e) => tracing::debug!("Event not accepted: {}", e),
        }
    }
    let records = engine.finish().await;
    print_records(&mut out, &records, &args)?;
    out.flush()?;

    super::finish_audit(audit_writer).await?;
    if source.malformed() > 0 {
        tracing::warn!(lines = source.malformed(), "Malformed input lines skipped");
    }
    eprintln!("{}", MetricsFormatter::format(&metrics.snapshot()));
    Ok(())
}

fn print_records(out: &mut impl Write, records: &[DecisionRecord], args: &ReplayArgs) -> Result<()> {
    if args.quiet {
        return Ok(());
    }
    for record in records {
        if args.decisions {
            writeln!(out, "{}", serde_json::to_string(record)?)?;
        } else if let Some(alert) = record.emitted_alert() {
            writeln!(out, "{}", serde_json::to_string(alert)?)?;
        }
    }
    Ok(())
}
