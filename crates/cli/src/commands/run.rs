//! `run` command: the live pipeline over a JSONL event stream.
//!
//! Events are read from a file or stdin and submitted as they arrive; alerts
//! are written to stdout as JSON lines. Ctrl-C or end of input triggers a
//! graceful shutdown that drains in-flight events and flushes open buckets.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use signalscan_core::config_loader::DEFAULT_CONFIG_PATH;
use signalscan_core::{
    ConfigLoader, ConfigWatcher, EngineMetrics, MetricsFormatter, PipelineError,
};
use signalscan_signals::{SignalPipeline, StdoutAlertSink};

use crate::input::EventSource;

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Config file path
    #[arg(short, long, env = "SIGNALSCAN_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// JSONL event file ("-" or omitted reads stdin)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Append candidate and decision audit records to this JSONL file
    #[arg(long)]
    pub audit: Option<PathBuf>,

    /// Reload the config file when it changes
    #[arg(long)]
    pub watch: bool,

    /// Log alerts instead of delivering them
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn run_live(args: RunArgs) -> Result<()> {
    let mut config = ConfigLoader::load_from(&args.config)?;
    if args.dry_run {
        config.engine.dry_run = true;
    }
    tracing::info!(
        config = %args.config.display(),
        partitions = config.engine.partitions,
        decision_workers = config.engine.decision_workers,
        dry_run = config.engine.dry_run,
        "Starting signal pipeline"
    );

    let audit_capacity = config.engine.audit_queue_capacity;
    let (watcher, shared) = ConfigWatcher::new(config);
    let metrics = Arc::new(EngineMetrics::new());
    let (audit, audit_writer) = super::open_audit(args.audit.as_deref(), audit_capacity, &metrics)?;

    let watch_task = if args.watch {
        let path = args.config.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = watcher.watch(path).await {
                tracing::error!("Config watcher stopped: {:#}", e);
            }
        }))
    } else {
        drop(watcher);
        None
    };

    let pipeline = SignalPipeline::builder(shared, Arc::new(StdoutAlertSink), audit)
        .metrics(Arc::clone(&metrics))
        .start();

    let mut source = EventSource::open(args.input.as_deref()).await?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupt received, shutting down");
                break;
            }
            next = source.next_event() => {
                let Some(event) = next? else {
                    tracing::info!("End of input, shutting down");
                    break;
                };
                match pipeline.submit(event) {
                    Ok(()) => {}
                    Err(PipelineError::ShuttingDown) => break,
                    Err(e) => tracing::debug!("Event not accepted: {}", e),
                }
            }
        }
    }

    let snapshot = pipeline.shutdown().await;
    drop(pipeline);
    if let Some(task) = watch_task {
        // exits once the pipeline's config receivers are gone
        if let Err(e) = task.await {
            tracing::error!("Config watcher task failed: {}", e);
        }
    }
    super::finish_audit(audit_writer).await?;

    if source.malformed() > 0 {
        tracing::warn!(lines = source.malformed(), "Malformed input lines skipped");
    }
    eprintln!("{}", MetricsFormatter::format(&snapshot));
    Ok(())
}
