#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use signalscan_core::{
    AuditSink, ChannelId, ConfigWatcher, EngineConfig, EngineMetrics, HaltStatus, NormalizedEvent,
};
use signalscan_signals::{MemoryAuditSink, SignalEngine};

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_736_000_000 + secs, 0).unwrap()
}

pub fn at_ms(ms: i64) -> DateTime<Utc> {
    at(0) + Duration::milliseconds(ms)
}

pub fn trade(symbol: &str, secs: i64, price: f64, size: f64) -> NormalizedEvent {
    NormalizedEvent::trade(symbol, at(secs), price, size)
}

pub fn halt(symbol: &str, secs: i64, status: HaltStatus) -> NormalizedEvent {
    NormalizedEvent::halt(symbol, at(secs), status, "LUDP")
}

pub fn news(symbol: &str, secs: i64, headline: &str, age_mins: i64) -> NormalizedEvent {
    NormalizedEvent::news(symbol, at(secs), headline, at(secs) - Duration::minutes(age_mins))
}

/// Price and volume spike channels only, with short warm-up windows.
pub fn spike_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    for channel in ChannelId::ALL {
        config.channels.common_mut(channel).enabled = false;
    }
    for channel in [ChannelId::PriceSpike, ChannelId::VolumeSpike, ChannelId::Halt, ChannelId::News] {
        config.channels.common_mut(channel).enabled = true;
    }
    config.channels.price_spike.window = 5;
    config.channels.price_spike.min_samples = 3;
    config.channels.volume_spike.window = 5;
    config.channels.volume_spike.min_samples = 3;
    config
}

pub struct EngineHarness {
    pub engine: SignalEngine,
    pub audit: Arc<MemoryAuditSink>,
    pub watcher: ConfigWatcher,
}

pub fn engine(config: EngineConfig) -> EngineHarness {
    let (watcher, shared) = ConfigWatcher::new(config);
    let audit = Arc::new(MemoryAuditSink::new());
    let engine = SignalEngine::new(
        shared,
        Arc::clone(&audit) as Arc<dyn AuditSink>,
        Arc::new(EngineMetrics::new()),
    );
    EngineHarness {
        engine,
        audit,
        watcher,
    }
}

/// Flat trading for `secs` seconds starting at `start`.
pub fn warm_up(symbol: &str, start: i64, secs: i64) -> Vec<NormalizedEvent> {
    (start..start + secs)
        .map(|s| trade(symbol, s, 100.0, 1_000.0))
        .collect()
}
