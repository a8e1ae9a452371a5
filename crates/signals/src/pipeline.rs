//! Concurrent live pipeline.
//!
//! ```text
//! submit ─► partition inboxes ─► channel runners (partition × channel)
//!                                      │
//!                                      ▼
//!                               candidate bus ─► consumer: audit, normalize, dedup offer
//!                                                    │
//!                      expiry scheduler ─────────────┤ resolved buckets
//!                                                    ▼
//!                              decision workers (by symbol) + exempt worker
//!                                                    │
//!                                                    ▼
//!                                     priority router ─► fast / normal dispatchers ─► AlertSink
//! ```
//!
//! Dedup deadlines are evaluated against an [`EventClock`]: the latest event
//! timestamp advanced by the wall-clock time elapsed since it was observed.
//! Real-time feeds therefore expire on time, and historical feeds pushed
//! through the live path still merge on event time.
//!
//! The partition count is fixed at start; every other setting follows the
//! live config.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use signalscan_core::{
    AlertSink, AuditRecord, AuditSink, ChannelId, EngineMetrics, Enricher, InputError,
    MetricsSnapshot, NormalizedEvent, PipelineError, SharedConfig,
};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;

use crate::aggregator::Normalizer;
use crate::bus::CandidateBus;
use crate::decision::DecisionStage;
use crate::dedup::{DedupEngine, ResolvedBucket};
use crate::partition_for;
use crate::router::{PriorityRouter, RouterTasks};
use crate::runner::{note_overload, ChannelRunner, InboxPush, RunnerInbox};
use crate::suppression::SuppressionEngine;
use crate::throttle::LogThrottle;

/// Event-time clock for the live pipeline.
#[derive(Debug, Default)]
pub struct EventClock {
    latest: Mutex<Option<(DateTime<Utc>, Instant)>>,
}

impl EventClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock to `ts` if it is newer than anything seen.
    pub fn observe(&self, ts: DateTime<Utc>) {
        let mut latest = self.latest.lock();
        if latest.map_or(true, |(seen, _)| ts > seen) {
            *latest = Some((ts, Instant::now()));
        }
    }

    /// Current event time, or `None` before the first event.
    #[must_use]
    pub fn now(&self) -> Option<DateTime<Utc>> {
        let latest = *self.latest.lock();
        latest.map(|(ts, observed)| {
            ts + chrono::Duration::from_std(observed.elapsed()).unwrap_or_else(|_| chrono::Duration::zero())
        })
    }
}

/// Routes resolved buckets to decision workers.
#[derive(Clone)]
struct BucketDispatch {
    workers: Vec<mpsc::UnboundedSender<ResolvedBucket>>,
    exempt: mpsc::UnboundedSender<ResolvedBucket>,
}

impl BucketDispatch {
    fn send(&self, bucket: ResolvedBucket) {
        let tx = if bucket.exempt {
            &self.exempt
        } else {
            &self.workers[partition_for(&bucket.symbol, self.workers.len())]
        };
        if let Err(e) = tx.send(bucket) {
            tracing::error!(symbol = %e.0.symbol, key = %e.0.key, "Decision worker gone, bucket lost");
        }
    }
}

struct PipelineTasks {
    inboxes: Vec<Arc<RunnerInbox>>,
    runners: Vec<JoinHandle<()>>,
    bus: Arc<CandidateBus>,
    consumer: JoinHandle<()>,
    scheduler_stop: oneshot::Sender<()>,
    scheduler: JoinHandle<()>,
    dispatch: BucketDispatch,
    workers: Vec<JoinHandle<()>>,
    router: RouterTasks,
    reload_listener: JoinHandle<()>,
}

/// Builder for [`SignalPipeline`].
pub struct PipelineBuilder {
    config: SharedConfig,
    alert_sink: Arc<dyn AlertSink>,
    audit: Arc<dyn AuditSink>,
    enricher: Option<Arc<dyn Enricher>>,
    metrics: Arc<EngineMetrics>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Spawns every task of the pipeline. Must be called within a Tokio
    /// runtime.
    #[must_use]
    pub fn start(self) -> SignalPipeline {
        let Self {
            config,
            alert_sink,
            audit,
            enricher,
            metrics,
        } = self;
        let snapshot = Arc::clone(&config.borrow());
        let rt = &snapshot.engine;
        let partitions = rt.partitions.max(1);

        let bus = Arc::new(CandidateBus::new(rt.bus_capacity, Arc::clone(&metrics)));
        let dedup = Arc::new(DedupEngine::new(config.clone(), partitions, Arc::clone(&metrics)));
        let clock = Arc::new(EventClock::new());
        let wake = Arc::new(Notify::new());

        // Runners: one per (partition, channel).
        let mut inboxes = Vec::with_capacity(partitions);
        let mut all_inboxes = Vec::new();
        let mut runners = Vec::new();
        for partition in 0..partitions {
            let mut row = Vec::with_capacity(ChannelId::COUNT);
            for channel in ChannelId::ALL {
                let inbox = Arc::new(RunnerInbox::new(rt.runner_queue_capacity));
                let runner = ChannelRunner::new(
                    channel,
                    partition,
                    Arc::clone(&inbox),
                    Arc::clone(&bus),
                    config.clone(),
                    Arc::clone(&metrics),
                );
                runners.push(tokio::spawn(runner.run()));
                all_inboxes.push(Arc::clone(&inbox));
                row.push((channel, inbox));
            }
            inboxes.push(row);
        }

        // Decision side.
        let mut stage = DecisionStage::new(
            config.clone(),
            SuppressionEngine::new(config.clone(), partitions),
            Arc::clone(&audit),
            Arc::clone(&metrics),
        );
        if let Some(enricher) = enricher {
            stage = stage.with_enricher(enricher);
        }
        let stage = Arc::new(stage);
        let (router, router_tasks) = PriorityRouter::spawn(&snapshot.router, alert_sink, Arc::clone(&metrics));
        let router = Arc::new(router);

        let mut worker_txs = Vec::new();
        let mut workers = Vec::new();
        for _ in 0..rt.decision_workers.max(1) {
            let (tx, rx) = mpsc::unbounded_channel();
            worker_txs.push(tx);
            workers.push(tokio::spawn(run_worker(rx, Arc::clone(&stage), Arc::clone(&router))));
        }
        let (exempt_tx, exempt_rx) = mpsc::unbounded_channel();
        workers.push(tokio::spawn(run_worker(exempt_rx, stage, router)));
        let dispatch = BucketDispatch {
            workers: worker_txs,
            exempt: exempt_tx,
        };

        let consumer = tokio::spawn(run_consumer(
            Arc::clone(&bus),
            Normalizer::new(config.clone()),
            Arc::clone(&dedup),
            Arc::clone(&audit),
            Arc::clone(&metrics),
            dispatch.clone(),
            Arc::clone(&wake),
        ));

        let (scheduler_stop, stop_rx) = oneshot::channel();
        let scheduler = tokio::spawn(run_scheduler(
            Arc::clone(&dedup),
            Arc::clone(&clock),
            Arc::clone(&wake),
            dispatch.clone(),
            stop_rx,
        ));

        let reload_listener = {
            let mut rx = config.clone();
            let metrics = Arc::clone(&metrics);
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    EngineMetrics::incr(&metrics.config_reloads);
                    tracing::info!("Live configuration updated");
                }
            })
        };

        tracing::info!(
            partitions,
            runners = runners.len(),
            decision_workers = rt.decision_workers.max(1),
            dry_run = rt.dry_run,
            "Signal pipeline started"
        );

        SignalPipeline {
            config,
            metrics,
            audit,
            clock,
            dedup,
            inboxes,
            last_seen: (0..partitions).map(|_| Mutex::new(HashMap::new())).collect(),
            accepting: AtomicBool::new(true),
            overload_log: LogThrottle::per_second(1),
            tasks: Mutex::new(Some(PipelineTasks {
                inboxes: all_inboxes,
                runners,
                bus,
                consumer,
                scheduler_stop,
                scheduler,
                dispatch,
                workers,
                router: router_tasks,
                reload_listener,
            })),
        }
    }
}

pub struct SignalPipeline {
    config: SharedConfig,
    metrics: Arc<EngineMetrics>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<EventClock>,
    dedup: Arc<DedupEngine>,
    inboxes: Vec<Vec<(ChannelId, Arc<RunnerInbox>)>>,
    last_seen: Vec<Mutex<HashMap<String, DateTime<Utc>>>>,
    accepting: AtomicBool,
    overload_log: LogThrottle,
    tasks: Mutex<Option<PipelineTasks>>,
}

impl SignalPipeline {
    #[must_use]
    pub fn builder(
        config: SharedConfig,
        alert_sink: Arc<dyn AlertSink>,
        audit: Arc<dyn AuditSink>,
    ) -> PipelineBuilder {
        PipelineBuilder {
            config,
            alert_sink,
            audit,
            enricher: None,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    #[must_use]
    pub fn clock(&self) -> &EventClock {
        &self.clock
    }

    /// Open dedup buckets.
    #[must_use]
    pub fn pending_buckets(&self) -> usize {
        self.dedup.pending_len()
    }

    /// Hands an event to the channel runners of its partition.
    ///
    /// Never blocks: when a runner's queue for the symbol is full the oldest
    /// queued event is dropped and counted.
    ///
    /// # Errors
    /// Returns [`PipelineError::Rejected`] for malformed, stale or
    /// out-of-universe events and [`PipelineError::ShuttingDown`] once
    /// shutdown has begun.
    pub fn submit(&self, event: NormalizedEvent) -> Result<(), PipelineError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(PipelineError::ShuttingDown);
        }
        if let Err(e) = event.validate() {
            EngineMetrics::incr(&self.metrics.events_rejected);
            return Err(e.into());
        }

        let config = Arc::clone(&self.config.borrow());
        if !config.engine.accepts_symbol(&event.symbol) {
            EngineMetrics::incr(&self.metrics.events_out_of_universe);
            return Err(InputError::UnknownSymbol {
                symbol: event.symbol.clone(),
            }
            .into());
        }

        let partition = partition_for(&event.symbol, self.inboxes.len());
        {
            let mut last_seen = self.last_seen[partition].lock();
            if let Some(last) = last_seen.get(&event.symbol) {
                if event.timestamp < *last {
                    EngineMetrics::incr(&self.metrics.events_stale);
                    return Err(InputError::Stale {
                        symbol: event.symbol.clone(),
                        lag_ms: (*last - event.timestamp).num_milliseconds(),
                    }
                    .into());
                }
            }
            last_seen.insert(event.symbol.clone(), event.timestamp);
        }

        EngineMetrics::incr(&self.metrics.events_accepted);
        self.clock.observe(event.timestamp);

        for (channel, inbox) in &self.inboxes[partition] {
            if !config.channels.common(*channel).enabled {
                continue;
            }
            match inbox.push(event.clone()) {
                InboxPush::Queued => {}
                InboxPush::DroppedOldest(dropped) => {
                    note_overload(&self.metrics, &self.overload_log, *channel, &dropped);
                }
                InboxPush::Closed => return Err(PipelineError::ShuttingDown),
            }
        }
        Ok(())
    }

    /// Stops the pipeline and returns the final metrics.
    ///
    /// Runners drain queued events for up to the configured grace period and
    /// are then abandoned; pending dedup buckets are force-resolved so every
    /// candidate reaches the audit trail. Later calls return immediately.
    pub async fn shutdown(&self) -> MetricsSnapshot {
        self.accepting.store(false, Ordering::Release);
        let tasks = self.tasks.lock().take();
        let Some(tasks) = tasks else {
            return self.metrics.snapshot();
        };
        tracing::info!("Shutting down signal pipeline");

        for inbox in &tasks.inboxes {
            inbox.close();
        }
        let grace = self.config.borrow().engine.shutdown_grace();
        let deadline = Instant::now() + grace;
        let mut runners = tasks.runners;
        let mut abandoned = false;
        for handle in &mut runners {
            if !abandoned {
                if let Ok(joined) = tokio::time::timeout_at(deadline, &mut *handle).await {
                    log_join_failure("channel runner", joined);
                    continue;
                }
            }
            if !abandoned {
                abandoned = true;
                let dropped: usize = tasks.inboxes.iter().map(|inbox| inbox.abandon()).sum();
                self.metrics
                    .runner_dropped
                    .fetch_add(dropped as u64, Ordering::Relaxed);
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    dropped,
                    "Shutdown grace period elapsed, abandoning queued events"
                );
            }
            log_join_failure("channel runner", handle.await);
        }

        tasks.bus.close();
        log_join_failure("candidate consumer", tasks.consumer.await);

        let _ = tasks.scheduler_stop.send(());
        log_join_failure("expiry scheduler", tasks.scheduler.await);

        let at = self.clock.now().unwrap_or_else(Utc::now);
        let flushed = self.dedup.flush_all(at);
        if !flushed.is_empty() {
            tracing::info!(buckets = flushed.len(), "Flushing pending dedup buckets");
        }
        for bucket in flushed {
            tasks.dispatch.send(bucket);
        }
        drop(tasks.dispatch);
        for worker in tasks.workers {
            log_join_failure("decision worker", worker.await);
        }
        tasks.router.join().await;

        tasks.reload_listener.abort();
        self.audit.flush();

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            events = snapshot.events_accepted,
            candidates = snapshot.candidates_total,
            emitted = snapshot.alerts_emitted,
            suppressed = snapshot.suppressed_total(),
            "Signal pipeline stopped"
        );
        snapshot
    }
}

async fn run_consumer(
    bus: Arc<CandidateBus>,
    normalizer: Normalizer,
    dedup: Arc<DedupEngine>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<EngineMetrics>,
    dispatch: BucketDispatch,
    wake: Arc<Notify>,
) {
    while let Some(candidate) = bus.pop().await {
        metrics.record_candidate(candidate.channel);
        tracing::debug!(
            symbol = %candidate.symbol,
            channel = %candidate.channel,
            reason = %candidate.reason,
            score = candidate.channel_score,
            "Candidate signal"
        );
        audit.record(AuditRecord::Candidate(candidate.clone()));

        let offer = dedup.offer(normalizer.normalize(candidate));
        if let Some(bucket) = offer.resolved {
            dispatch.send(bucket);
        }
        if !offer.merged {
            wake.notify_one();
        }
    }
    tracing::debug!("Candidate consumer stopped");
}

/// Idle sleep when no bucket is pending.
const IDLE_TICK: Duration = Duration::from_secs(60);

async fn run_scheduler(
    dedup: Arc<DedupEngine>,
    clock: Arc<EventClock>,
    wake: Arc<Notify>,
    dispatch: BucketDispatch,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        if let Some(now) = clock.now() {
            for bucket in dedup.expire(now) {
                dispatch.send(bucket);
            }
        }

        let sleep_for = match (dedup.next_deadline(), clock.now()) {
            (Some(deadline), Some(now)) => (deadline - now).to_std().unwrap_or(Duration::ZERO),
            _ => IDLE_TICK,
        };

        tokio::select! {
            _ = &mut stop => break,
            () = wake.notified() => {}
            () = tokio::time::sleep(sleep_for) => {}
        }
    }
    tracing::debug!("Expiry scheduler stopped");
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<ResolvedBucket>,
    stage: Arc<DecisionStage>,
    router: Arc<PriorityRouter>,
) {
    while let Some(bucket) = rx.recv().await {
        let record = stage.resolve(bucket).await;
        if let Some(alert) = record.emitted_alert() {
            router.route(alert.clone()).await;
        }
    }
}

/// Logs a stage task that panicked or was cancelled.
fn log_join_failure(stage: &'static str, joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        tracing::error!(stage, "Pipeline task failed: {}", e);
    }
}
