//! Cooldown and rate-cap suppression.
//!
//! Per symbol, the engine remembers the last emit time of every channel and
//! keeps two rolling counters of emits (one minute, one hour). A resolved
//! bucket is suppressed while its dominant channel is cooling down for the
//! symbol, or while either counter is at its cap. Priority-exempt buckets
//! bypass both checks and are not counted.
//!
//! All times are event times (the alert timestamp), never wall-clock.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use signalscan_core::{ChannelId, SharedConfig, SuppressionReason};

use crate::dedup::ResolvedBucket;
use crate::partition_for;

/// Emit timestamps inside a sliding window.
///
/// Stamps are kept sorted so late (out-of-order) emits count correctly.
#[derive(Debug, Clone)]
pub struct RollingCounter {
    window: Duration,
    stamps: VecDeque<DateTime<Utc>>,
    high_water: Option<DateTime<Utc>>,
}

impl RollingCounter {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            stamps: VecDeque::new(),
            high_water: None,
        }
    }

    pub fn record(&mut self, at: DateTime<Utc>) {
        let idx = self.stamps.partition_point(|s| *s <= at);
        self.stamps.insert(idx, at);
        self.prune(at);
    }

    /// Number of stamps strictly newer than `now - window`.
    #[must_use]
    pub fn count(&self, now: DateTime<Utc>) -> usize {
        let floor = now - self.window;
        self.stamps.len() - self.stamps.partition_point(|s| *s <= floor)
    }

    fn prune(&mut self, at: DateTime<Utc>) {
        let high_water = self.high_water.map_or(at, |h| h.max(at));
        self.high_water = Some(high_water);
        // Keep one extra window so an older `now` still counts correctly.
        let floor = high_water - self.window - self.window;
        while self.stamps.front().is_some_and(|s| *s <= floor) {
            self.stamps.pop_front();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}

#[derive(Debug)]
struct SymbolState {
    last_emit: HashMap<ChannelId, DateTime<Utc>>,
    minute: RollingCounter,
    hour: RollingCounter,
}

impl Default for SymbolState {
    fn default() -> Self {
        Self {
            last_emit: HashMap::new(),
            minute: RollingCounter::new(Duration::minutes(1)),
            hour: RollingCounter::new(Duration::hours(1)),
        }
    }
}

pub struct SuppressionEngine {
    shards: Vec<Mutex<HashMap<String, SymbolState>>>,
    config: SharedConfig,
}

impl SuppressionEngine {
    #[must_use]
    pub fn new(config: SharedConfig, shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
            config,
        }
    }

    fn shard(&self, symbol: &str) -> &Mutex<HashMap<String, SymbolState>> {
        &self.shards[partition_for(symbol, self.shards.len())]
    }

    /// Returns why the bucket would be suppressed at `at`, if it would.
    #[must_use]
    pub fn check(&self, bucket: &ResolvedBucket, at: DateTime<Utc>) -> Option<SuppressionReason> {
        if bucket.exempt {
            return None;
        }
        let shard = self.shard(&bucket.symbol).lock();
        let state = shard.get(&bucket.symbol)?;
        self.evaluate(state, bucket.reason_channel, at)
    }

    /// Checks the bucket and, if allowed, records the emit under one lock.
    ///
    /// # Errors
    /// Returns the suppression reason when the bucket must not be emitted.
    pub fn admit(&self, bucket: &ResolvedBucket, at: DateTime<Utc>) -> Result<(), SuppressionReason> {
        if bucket.exempt {
            return Ok(());
        }
        let mut shard = self.shard(&bucket.symbol).lock();
        let state = shard.entry(bucket.symbol.clone()).or_default();
        if let Some(reason) = self.evaluate(state, bucket.reason_channel, at) {
            return Err(reason);
        }
        Self::stamp(state, bucket.contributions.iter().map(|c| c.channel), at);
        Ok(())
    }

    /// Records an emit for every contributing channel of the bucket.
    pub fn record_emit(&self, bucket: &ResolvedBucket, at: DateTime<Utc>) {
        if bucket.exempt {
            return;
        }
        let mut shard = self.shard(&bucket.symbol).lock();
        let state = shard.entry(bucket.symbol.clone()).or_default();
        Self::stamp(state, bucket.contributions.iter().map(|c| c.channel), at);
    }

    fn stamp(state: &mut SymbolState, channels: impl Iterator<Item = ChannelId>, at: DateTime<Utc>) {
        for channel in channels {
            let last = state.last_emit.entry(channel).or_insert(at);
            if at > *last {
                *last = at;
            }
        }
        state.minute.record(at);
        state.hour.record(at);
    }

    fn evaluate(
        &self,
        state: &SymbolState,
        channel: ChannelId,
        at: DateTime<Utc>,
    ) -> Option<SuppressionReason> {
        let config = self.config.borrow();
        let limits = &config.suppression;

        if let Some(last) = state.last_emit.get(&channel) {
            let elapsed = at - *last;
            let cooldown = limits.cooldown();
            if elapsed < cooldown {
                return Some(SuppressionReason::Cooldown {
                    channel,
                    remaining_ms: (cooldown - elapsed).num_milliseconds(),
                });
            }
        }
        if state.minute.count(at) >= limits.max_alerts_per_minute as usize {
            return Some(SuppressionReason::MinuteCap {
                limit: limits.max_alerts_per_minute,
            });
        }
        if state.hour.count(at) >= limits.max_alerts_per_hour as usize {
            return Some(SuppressionReason::HourCap {
                limit: limits.max_alerts_per_hour,
            });
        }
        None
    }

    /// Number of emits counted for `symbol` in the minute ending at `at`.
    #[must_use]
    pub fn emits_last_minute(&self, symbol: &str, at: DateTime<Utc>) -> usize {
        self.shard(symbol)
            .lock()
            .get(symbol)
            .map_or(0, |s| s.minute.count(at))
    }
}
