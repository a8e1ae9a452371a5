//! Deterministic single-task engine for replays and backtests.
//!
//! Runs the same stages as the live pipeline (detectors, normalizer, dedup,
//! decision) inline on the caller's task. Bucket expiry is driven by the
//! event-time watermark instead of a timer, so the same input and config
//! always produce the same decisions.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use signalscan_core::{
    AuditRecord, AuditSink, DecisionRecord, EngineConfig, EngineMetrics, Enricher, InputError,
    NormalizedEvent, SharedConfig,
};

use crate::aggregator::normalize_with;
use crate::decision::DecisionStage;
use crate::dedup::DedupEngine;
use crate::registry::DetectorRegistry;
use crate::suppression::SuppressionEngine;

pub struct SignalEngine {
    config: SharedConfig,
    applied: Arc<EngineConfig>,
    registry: DetectorRegistry,
    dedup: DedupEngine,
    decisions: DecisionStage,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<EngineMetrics>,
    last_seen: HashMap<String, DateTime<Utc>>,
    watermark: Option<DateTime<Utc>>,
}

impl SignalEngine {
    #[must_use]
    pub fn new(config: SharedConfig, audit: Arc<dyn AuditSink>, metrics: Arc<EngineMetrics>) -> Self {
        let applied = Arc::clone(&config.borrow());
        let shards = applied.engine.partitions;
        Self {
            registry: DetectorRegistry::from_config(&applied.channels),
            dedup: DedupEngine::new(config.clone(), shards, Arc::clone(&metrics)),
            decisions: DecisionStage::new(
                config.clone(),
                SuppressionEngine::new(config.clone(), shards),
                Arc::clone(&audit),
                Arc::clone(&metrics),
            ),
            config,
            applied,
            audit,
            metrics,
            last_seen: HashMap::new(),
            watermark: None,
        }
    }

    #[must_use]
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.decisions = self.decisions.with_enricher(enricher);
        self
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Open dedup buckets.
    #[must_use]
    pub fn pending_buckets(&self) -> usize {
        self.dedup.pending_len()
    }

    /// Highest event timestamp accepted so far.
    #[must_use]
    pub const fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    /// Feeds one event and returns the decisions it caused.
    ///
    /// Buckets whose deadline is at or before the event's timestamp are
    /// resolved first, then the event's candidates are offered.
    ///
    /// # Errors
    /// Returns an [`InputError`] if the event is malformed, outside the
    /// configured universe, or older than the last event for its symbol. The
    /// event is dropped and the engine keeps going.
    pub async fn process(&mut self, event: &NormalizedEvent) -> Result<Vec<DecisionRecord>, InputError> {
        let config = self.refresh_config();
        self.admit(event, &config)?;

        let now = self.watermark.map_or(event.timestamp, |w| w.max(event.timestamp));
        self.watermark = Some(now);

        let mut records = Vec::new();
        for bucket in self.dedup.expire(now) {
            records.push(self.decisions.resolve(bucket).await);
        }

        let candidates = self.registry.process_all(event, &config.channels, &self.metrics);
        for candidate in candidates {
            self.metrics.record_candidate(candidate.channel);
            tracing::debug!(
                symbol = %candidate.symbol,
                channel = %candidate.channel,
                reason = %candidate.reason,
                score = candidate.channel_score,
                "Candidate signal"
            );
            self.audit.record(AuditRecord::Candidate(candidate.clone()));
            let offer = self.dedup.offer(normalize_with(candidate, &config.channels));
            if let Some(bucket) = offer.resolved {
                records.push(self.decisions.resolve(bucket).await);
            }
        }
        Ok(records)
    }

    /// Force-resolves every pending bucket and flushes the audit sink.
    pub async fn finish(&mut self) -> Vec<DecisionRecord> {
        let mut records = Vec::new();
        if let Some(at) = self.watermark {
            for bucket in self.dedup.flush_all(at) {
                records.push(self.decisions.resolve(bucket).await);
            }
        }
        self.audit.flush();
        records
    }

    fn refresh_config(&mut self) -> Arc<EngineConfig> {
        let current = Arc::clone(&self.config.borrow());
        if !Arc::ptr_eq(&current, &self.applied) {
            EngineMetrics::incr(&self.metrics.config_reloads);
            let rebuilt = self.registry.reconfigure(&self.applied.channels, &current.channels);
            tracing::info!(rebuilt = rebuilt.len(), "Configuration reloaded");
            self.applied = Arc::clone(&current);
        }
        current
    }

    fn admit(&mut self, event: &NormalizedEvent, config: &EngineConfig) -> Result<(), InputError> {
        if let Err(e) = event.validate() {
            EngineMetrics::incr(&self.metrics.events_rejected);
            tracing::debug!(symbol = %event.symbol, "Rejected event: {}", e);
            return Err(e);
        }
        if !config.engine.accepts_symbol(&event.symbol) {
            EngineMetrics::incr(&self.metrics.events_out_of_universe);
            return Err(InputError::UnknownSymbol {
                symbol: event.symbol.clone(),
            });
        }
        if let Some(last) = self.last_seen.get(&event.symbol) {
            if event.timestamp < *last {
                EngineMetrics::incr(&self.metrics.events_stale);
                return Err(InputError::Stale {
                    symbol: event.symbol.clone(),
                    lag_ms: (*last - event.timestamp).num_milliseconds(),
                });
            }
        }
        self.last_seen.insert(event.symbol.clone(), event.timestamp);
        EngineMetrics::incr(&self.metrics.events_accepted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::detector::test_support::*;
    use signalscan_core::{ConfigWatcher, Disposition, HaltStatus, Priority, ReasonCode};

    fn engine(config: EngineConfig) -> (SignalEngine, Arc<MemoryAuditSink>, ConfigWatcher) {
        let (watcher, rx) = ConfigWatcher::new(config);
        let audit = Arc::new(MemoryAuditSink::new());
        let engine = SignalEngine::new(
            rx,
            Arc::clone(&audit) as Arc<dyn AuditSink>,
            Arc::new(EngineMetrics::new()),
        );
        (engine, audit, watcher)
    }

    fn fast_price_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.channels.price_spike.window = 5;
        config.channels.price_spike.min_samples = 3;
        config
    }

    #[tokio::test]
    async fn halt_resolves_immediately_as_critical() {
        let (mut engine, audit, _w) = engine(EngineConfig::default());
        let records = engine
            .process(&NormalizedEvent::halt("ABC", at(0), HaltStatus::Halted, "LUDP"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        let alert = records[0].emitted_alert().unwrap();
        assert_eq!(alert.priority, Priority::Critical);
        assert_eq!(alert.reason, ReasonCode::Halt);
        assert_eq!(audit.candidates().len(), 1);
        assert_eq!(engine.pending_buckets(), 0);
    }

    #[tokio::test]
    async fn bucket_resolves_when_watermark_passes_deadline() {
        let (mut engine, _audit, _w) = engine(fast_price_config());
        for secs in 0..3 {
            assert!(engine.process(&trade("XYZ", secs, 100.0, 100.0)).await.unwrap().is_empty());
        }
        assert!(engine.process(&trade("XYZ", 3, 102.0, 100.0)).await.unwrap().is_empty());
        assert_eq!(engine.pending_buckets(), 1);

        // another symbol's event advances the watermark past the deadline
        let records = engine.process(&trade("ABC", 6, 10.0, 1.0)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].disposition, Disposition::Emitted);
        assert_eq!(records[0].symbol, "XYZ");
        assert_eq!(records[0].recorded_at, at(6));
    }

    #[tokio::test]
    async fn finish_flushes_pending_buckets() {
        let (mut engine, audit, _w) = engine(fast_price_config());
        for secs in 0..3 {
            engine.process(&trade("XYZ", secs, 100.0, 100.0)).await.unwrap();
        }
        engine.process(&trade("XYZ", 3, 102.0, 100.0)).await.unwrap();

        let records = engine.finish().await;
        assert_eq!(records.len(), 1);
        let alert = records[0].alert.as_ref().unwrap();
        assert_eq!(alert.raw_details.get("flushed"), Some(&serde_json::Value::Bool(true)));
        assert_eq!(audit.decisions().len(), 1);
        assert_eq!(engine.pending_buckets(), 0);
    }

    #[tokio::test]
    async fn rejects_invalid_stale_and_unknown_events() {
        let mut config = EngineConfig::default();
        config.engine.universe = vec!["XYZ".to_string()];
        let (mut engine, _audit, _w) = engine(config);

        assert!(matches!(
            engine.process(&trade("XYZ", 0, f64::NAN, 1.0)).await,
            Err(InputError::InvalidNumber { .. })
        ));
        assert!(matches!(
            engine.process(&trade("ABC", 0, 1.0, 1.0)).await,
            Err(InputError::UnknownSymbol { .. })
        ));
        engine.process(&trade("XYZ", 10, 1.0, 1.0)).await.unwrap();
        assert!(matches!(
            engine.process(&trade("XYZ", 5, 1.0, 1.0)).await,
            Err(InputError::Stale { lag_ms: 5_000, .. })
        ));

        let snap = engine.metrics().snapshot();
        assert_eq!(snap.events_rejected, 1);
        assert_eq!(snap.events_out_of_universe, 1);
        assert_eq!(snap.events_stale, 1);
        assert_eq!(snap.events_accepted, 1);
    }

    #[tokio::test]
    async fn reload_rebuilds_changed_detectors() {
        let (mut engine, _audit, watcher) = engine(fast_price_config());
        for secs in 0..3 {
            engine.process(&trade("XYZ", secs, 100.0, 100.0)).await.unwrap();
        }

        let mut next = fast_price_config();
        next.channels.price_spike.min_samples = 4;
        watcher.publish(next).unwrap();

        // rebuilt detector is cold again, so this spike cannot fire
        engine.process(&trade("XYZ", 3, 110.0, 100.0)).await.unwrap();
        assert_eq!(engine.pending_buckets(), 0);
        assert_eq!(engine.metrics().snapshot().config_reloads, 1);
    }

    #[tokio::test]
    async fn disabled_channel_produces_nothing() {
        let mut config = fast_price_config();
        config.channels.price_spike.common.enabled = false;
        let (mut engine, audit, _w) = engine(config);
        for secs in 0..3 {
            engine.process(&trade("XYZ", secs, 100.0, 100.0)).await.unwrap();
        }
        engine.process(&trade("XYZ", 3, 120.0, 100.0)).await.unwrap();
        assert!(audit.candidates().is_empty());
    }
}
