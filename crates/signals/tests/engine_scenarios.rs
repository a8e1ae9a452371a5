//! End-to-end scenarios through the deterministic engine.

mod common;

use common::*;
use signalscan_core::{
    ChannelId, DecisionRecord, Disposition, EngineConfig, HaltStatus, NormalizedEvent, Priority,
    ReasonCode,
};
use std::collections::BTreeSet;

async fn feed(harness: &mut EngineHarness, events: &[NormalizedEvent]) -> Vec<DecisionRecord> {
    let mut records = Vec::new();
    for event in events {
        if let Ok(mut out) = harness.engine.process(event).await {
            records.append(&mut out);
        }
    }
    records
}

// ============================================
// Correlated spikes
// ============================================

#[tokio::test]
async fn price_and_volume_spike_merge_into_one_alert() {
    let mut h = engine(spike_config());
    assert!(feed(&mut h, &warm_up("XYZ", 0, 3)).await.is_empty());

    // +2% on six times the average size
    let records = feed(&mut h, &[trade("XYZ", 3, 102.0, 6_000.0)]).await;
    assert!(records.is_empty());
    assert_eq!(h.engine.pending_buckets(), 1);
    assert_eq!(h.audit.candidates().len(), 2);

    // another symbol's event moves the watermark past the bucket deadline
    let records = feed(&mut h, &[trade("ABC", 7, 10.0, 10.0)]).await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.disposition, Disposition::Emitted);
    assert_eq!(record.candidate_count, 2);
    assert_eq!(
        record.channels,
        BTreeSet::from([ChannelId::PriceSpike, ChannelId::VolumeSpike])
    );

    let alert = record.emitted_alert().unwrap();
    assert_eq!(alert.symbol, "XYZ");
    assert_eq!(alert.timestamp, at(3));
    assert_eq!(alert.reason, ReasonCode::PriceSpikeUp);
    assert!((alert.final_score - 100.0).abs() < 1e-9);
    assert_eq!(alert.priority, Priority::High);
    assert!(alert.summary.starts_with("XYZ: "));
    assert_eq!(h.engine.metrics().snapshot().candidates_merged, 1);
}

#[tokio::test]
async fn burst_of_five_trades_above_median_yields_one_alert() {
    let mut h = engine(spike_config());
    assert!(feed(&mut h, &warm_up("XYZ", 0, 10)).await.is_empty());

    // five prints inside two seconds, each at least 1% over the rolling
    // median, on six times the average size
    let burst: Vec<_> = [101.5, 102.5, 103.5, 104.5, 105.5]
        .iter()
        .enumerate()
        .map(|(i, price)| NormalizedEvent::trade("XYZ", at_ms(10_000 + 500 * i as i64), *price, 6_000.0))
        .collect();
    assert!(feed(&mut h, &burst).await.is_empty());
    assert_eq!(h.engine.pending_buckets(), 1);
    let price_hits = h
        .audit
        .candidates()
        .iter()
        .filter(|c| c.channel == ChannelId::PriceSpike)
        .count();
    assert_eq!(price_hits, 5);

    let records = feed(&mut h, &[trade("ABC", 20, 10.0, 10.0)]).await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.disposition, Disposition::Emitted);
    assert_eq!(
        record.channels,
        BTreeSet::from([ChannelId::PriceSpike, ChannelId::VolumeSpike])
    );
    let alert = record.emitted_alert().unwrap();
    assert_eq!(alert.timestamp, at(10));
    assert!(alert.final_score > 60.0);
    assert!(matches!(alert.priority, Priority::Medium | Priority::High));
}

#[tokio::test]
async fn cold_start_suppresses_even_extreme_moves() {
    let mut h = engine(spike_config());
    let events = [
        trade("XYZ", 0, 100.0, 1_000.0),
        trade("XYZ", 1, 100.0, 1_000.0),
        trade("XYZ", 2, 500.0, 1_000_000.0),
    ];
    assert!(feed(&mut h, &events).await.is_empty());
    assert!(h.audit.candidates().is_empty());
    assert!(h.engine.finish().await.is_empty());
}

// ============================================
// Priority-exempt reasons
// ============================================

#[tokio::test]
async fn halt_and_resume_are_critical_and_never_suppressed() {
    let mut h = engine(spike_config());
    let records = feed(
        &mut h,
        &[
            halt("ABC", 0, HaltStatus::Halted),
            halt("ABC", 30, HaltStatus::Resumed),
            halt("ABC", 40, HaltStatus::Halted),
            halt("ABC", 45, HaltStatus::Resumed),
        ],
    )
    .await;

    assert_eq!(records.len(), 4);
    let reasons: Vec<_> = records
        .iter()
        .map(|r| {
            let alert = r.emitted_alert().expect("halt alerts are always emitted");
            assert_eq!(alert.priority, Priority::Critical);
            alert.reason
        })
        .collect();
    assert_eq!(
        reasons,
        vec![ReasonCode::Halt, ReasonCode::Resume, ReasonCode::Halt, ReasonCode::Resume]
    );

    let snap = h.engine.metrics().snapshot();
    assert_eq!(snap.suppressed_total(), 0);
    assert_eq!(h.engine.pending_buckets(), 0);
}

#[tokio::test]
async fn fresh_breaking_news_alerts_immediately() {
    let mut h = engine(spike_config());
    let records = feed(
        &mut h,
        &[news("XYZ", 0, "XYZ shares jump as FDA approves lead drug", 5)],
    )
    .await;

    assert_eq!(records.len(), 1);
    let alert = records[0].emitted_alert().unwrap();
    assert_eq!(alert.reason, ReasonCode::BreakingNews);
    assert_eq!(alert.priority, Priority::High);
}

#[tokio::test]
async fn stale_headline_is_ignored() {
    let mut h = engine(spike_config());
    let records = feed(
        &mut h,
        &[news("XYZ", 0, "FDA approves lead drug", 60 * 24 * 7)],
    )
    .await;
    assert!(records.is_empty());
    assert!(h.audit.candidates().is_empty());
}

// ============================================
// Replay
// ============================================

fn session_script() -> Vec<NormalizedEvent> {
    let mut events = Vec::new();
    for s in 0..20 {
        events.push(trade("XYZ", s, 100.0 + (s % 3) as f64 * 0.1, 1_000.0));
        events.push(trade("ABC", s, 50.0, 500.0));
    }
    events.push(trade("XYZ", 20, 103.0, 9_000.0));
    events.push(halt("ABC", 21, HaltStatus::Halted));
    events.push(news("XYZ", 22, "XYZ enters definitive merger agreement", 2));
    for s in 23..40 {
        events.push(trade("XYZ", s, 103.0, 1_000.0));
    }
    events.push(halt("ABC", 41, HaltStatus::Resumed));
    events.push(trade("ABC", 42, 45.0, 5_000.0));
    for s in 43..60 {
        events.push(trade("ABC", s, 45.0, 500.0));
    }
    events
}

/// Decision content without the per-run alert id.
fn fingerprint(records: &[DecisionRecord]) -> Vec<serde_json::Value> {
    records
        .iter()
        .map(|r| {
            let mut value = serde_json::to_value(r).unwrap();
            if let Some(alert) = value.get_mut("alert").and_then(|a| a.as_object_mut()) {
                alert.remove("id");
            }
            value
        })
        .collect()
}

async fn replay(config: EngineConfig, events: &[NormalizedEvent]) -> Vec<DecisionRecord> {
    let mut h = engine(config);
    let mut records = feed(&mut h, events).await;
    records.extend(h.engine.finish().await);
    records
}

#[tokio::test]
async fn replay_is_deterministic() {
    let events = session_script();
    let first = replay(spike_config(), &events).await;
    let second = replay(spike_config(), &events).await;

    assert!(!first.is_empty());
    assert!(first.iter().any(|r| r.emitted_alert().is_some()));
    assert_eq!(fingerprint(&first), fingerprint(&second));
}

#[tokio::test]
async fn replay_with_every_channel_enabled_is_deterministic() {
    let events = session_script();
    let first = replay(EngineConfig::default(), &events).await;
    let second = replay(EngineConfig::default(), &events).await;
    assert_eq!(fingerprint(&first), fingerprint(&second));
}
