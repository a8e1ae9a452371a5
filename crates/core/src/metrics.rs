//! Lock-free counters shared by every pipeline stage.
//!
//! Counters are plain relaxed atomics; a [`MetricsSnapshot`] is a consistent
//! enough view for reports and tests, not a transactional one.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::signal::{ChannelId, SuppressionReason};

const LATENCY_BUCKETS: usize = 32;

/// Log2-bucketed latency histogram in microseconds.
#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; LATENCY_BUCKETS],
    count: AtomicU64,
    max_us: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            max_us: AtomicU64::new(0),
        }
    }
}

impl LatencyHistogram {
    pub fn record(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let idx = (u64::BITS - us.leading_zeros()) as usize;
        self.buckets[idx.min(LATENCY_BUCKETS - 1)].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Upper bound (µs) of the bucket containing the given quantile.
    #[must_use]
    pub fn quantile_us(&self, q: f64) -> u64 {
        let total = self.count();
        if total == 0 {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let target = ((total as f64) * q.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (idx, bucket) in self.buckets.iter().enumerate() {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= target {
                let upper = if idx == 0 { 0 } else { (1u64 << idx) - 1 };
                return upper.min(self.max_us.load(Ordering::Relaxed));
            }
        }
        self.max_us.load(Ordering::Relaxed)
    }
}

/// Counters for the whole engine. Share behind an `Arc`.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub events_accepted: AtomicU64,
    pub events_rejected: AtomicU64,
    pub events_out_of_universe: AtomicU64,
    pub events_stale: AtomicU64,
    pub runner_dropped: AtomicU64,
    pub candidates_total: AtomicU64,
    pub bus_dropped: AtomicU64,
    pub buckets_resolved: AtomicU64,
    pub candidates_merged: AtomicU64,
    pub alerts_emitted: AtomicU64,
    pub alerts_dry_run: AtomicU64,
    pub audit_only: AtomicU64,
    pub suppressed_cooldown: AtomicU64,
    pub suppressed_minute_cap: AtomicU64,
    pub suppressed_hour_cap: AtomicU64,
    pub decision_errors: AtomicU64,
    pub enrichment_timeouts: AtomicU64,
    pub enrichment_failures: AtomicU64,
    pub routed_fast: AtomicU64,
    pub routed_normal: AtomicU64,
    pub router_dropped: AtomicU64,
    pub delivery_failures: AtomicU64,
    pub audit_dropped: AtomicU64,
    pub config_reloads: AtomicU64,
    channel_candidates: [AtomicU64; ChannelId::COUNT],
    channel_faults: [AtomicU64; ChannelId::COUNT],
    pub decision_latency: LatencyHistogram,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl EngineMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        bump(counter);
    }

    pub fn record_candidate(&self, channel: ChannelId) {
        bump(&self.candidates_total);
        bump(&self.channel_candidates[channel.index()]);
    }

    pub fn record_detector_fault(&self, channel: ChannelId) {
        bump(&self.channel_faults[channel.index()]);
    }

    pub fn record_suppression(&self, reason: &SuppressionReason) {
        match reason {
            SuppressionReason::Cooldown { .. } => bump(&self.suppressed_cooldown),
            SuppressionReason::MinuteCap { .. } => bump(&self.suppressed_minute_cap),
            SuppressionReason::HourCap { .. } => bump(&self.suppressed_hour_cap),
        }
    }

    #[must_use]
    pub fn channel_candidates(&self, channel: ChannelId) -> u64 {
        self.channel_candidates[channel.index()].load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn detector_faults(&self, channel: ChannelId) -> u64 {
        self.channel_faults[channel.index()].load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let per_channel = |arr: &[AtomicU64; ChannelId::COUNT]| {
            ChannelId::ALL
                .iter()
                .filter_map(|ch| {
                    let n = load(&arr[ch.index()]);
                    (n > 0).then(|| (ch.as_str().to_string(), n))
                })
                .collect::<BTreeMap<_, _>>()
        };

        MetricsSnapshot {
            events_accepted: load(&self.events_accepted),
            events_rejected: load(&self.events_rejected),
            events_out_of_universe: load(&self.events_out_of_universe),
            events_stale: load(&self.events_stale),
            runner_dropped: load(&self.runner_dropped),
            candidates_total: load(&self.candidates_total),
            candidates_by_channel: per_channel(&self.channel_candidates),
            detector_faults: per_channel(&self.channel_faults),
            bus_dropped: load(&self.bus_dropped),
            buckets_resolved: load(&self.buckets_resolved),
            candidates_merged: load(&self.candidates_merged),
            alerts_emitted: load(&self.alerts_emitted),
            alerts_dry_run: load(&self.alerts_dry_run),
            audit_only: load(&self.audit_only),
            suppressed_cooldown: load(&self.suppressed_cooldown),
            suppressed_minute_cap: load(&self.suppressed_minute_cap),
            suppressed_hour_cap: load(&self.suppressed_hour_cap),
            decision_errors: load(&self.decision_errors),
            enrichment_timeouts: load(&self.enrichment_timeouts),
            enrichment_failures: load(&self.enrichment_failures),
            routed_fast: load(&self.routed_fast),
            routed_normal: load(&self.routed_normal),
            router_dropped: load(&self.router_dropped),
            delivery_failures: load(&self.delivery_failures),
            audit_dropped: load(&self.audit_dropped),
            config_reloads: load(&self.config_reloads),
            decisions_timed: self.decision_latency.count(),
            decision_p50_us: self.decision_latency.quantile_us(0.50),
            decision_p90_us: self.decision_latency.quantile_us(0.90),
            decision_p99_us: self.decision_latency.quantile_us(0.99),
        }
    }
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub events_accepted: u64,
    pub events_rejected: u64,
    pub events_out_of_universe: u64,
    pub events_stale: u64,
    pub runner_dropped: u64,
    pub candidates_total: u64,
    pub candidates_by_channel: BTreeMap<String, u64>,
    pub detector_faults: BTreeMap<String, u64>,
    pub bus_dropped: u64,
    pub buckets_resolved: u64,
    pub candidates_merged: u64,
    pub alerts_emitted: u64,
    pub alerts_dry_run: u64,
    pub audit_only: u64,
    pub suppressed_cooldown: u64,
    pub suppressed_minute_cap: u64,
    pub suppressed_hour_cap: u64,
    pub decision_errors: u64,
    pub enrichment_timeouts: u64,
    pub enrichment_failures: u64,
    pub routed_fast: u64,
    pub routed_normal: u64,
    pub router_dropped: u64,
    pub delivery_failures: u64,
    pub audit_dropped: u64,
    pub config_reloads: u64,
    pub decisions_timed: u64,
    pub decision_p50_us: u64,
    pub decision_p90_us: u64,
    pub decision_p99_us: u64,
}

impl MetricsSnapshot {
    #[must_use]
    pub fn suppressed_total(&self) -> u64 {
        self.suppressed_cooldown + self.suppressed_minute_cap + self.suppressed_hour_cap
    }
}
