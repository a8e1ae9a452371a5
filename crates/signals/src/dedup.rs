//! Candidate deduplication.
//!
//! Weighted candidates are grouped into pending buckets keyed by
//! `(symbol, reason family)`. A bucket opens at the timestamp of its first
//! candidate and stays open for the dedup window; candidates with the same
//! key and a timestamp before the deadline merge into it. On expiry the
//! bucket resolves into a [`ResolvedBucket`] for the decision stage.
//!
//! Priority-exempt candidates never wait: they merge into an open bucket with
//! the same key (if any) and resolve it immediately, or resolve alone.
//!
//! Bucket state is sharded by symbol hash, each shard behind its own lock,
//! with a min-heap of deadlines per shard (stale heap entries are skipped
//! lazily).

use std::cmp::Reverse;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use signalscan_core::{
    ChannelId, EngineMetrics, RawDetails, ReasonCode, ReasonPolicy, SharedConfig,
};
use uuid::Uuid;

use crate::aggregator::WeightedCandidate;
use crate::partition_for;

/// Lookup key of a dedup bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub symbol: String,
    /// Hash of the normalized reason (the reason family).
    pub reason_hash: u64,
    /// `floor(opened_at / window)`.
    pub time_bucket: i64,
}

impl DedupKey {
    #[must_use]
    pub fn derive(symbol: &str, reason: ReasonCode, opened_at: DateTime<Utc>, window_ms: u64) -> Self {
        let window_ms = i64::try_from(window_ms.max(1)).unwrap_or(i64::MAX);
        Self {
            symbol: symbol.to_string(),
            reason_hash: reason_hash(reason),
            time_bucket: opened_at.timestamp_millis().div_euclid(window_ms),
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:016x}/{}", self.symbol, self.reason_hash, self.time_bucket)
    }
}

/// Hash of a reason's family.
#[must_use]
pub fn reason_hash(reason: ReasonCode) -> u64 {
    let mut hasher = DefaultHasher::new();
    reason.family().hash(&mut hasher);
    hasher.finish()
}

/// Best contribution of one channel to a bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub channel: ChannelId,
    pub reason: ReasonCode,
    pub channel_score: f64,
    pub normalized_score: f64,
    pub weight: f64,
    pub candidate_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub raw_details: RawDetails,
}

impl Contribution {
    fn from_weighted(wc: WeightedCandidate) -> Self {
        Self {
            channel: wc.candidate.channel,
            reason: wc.candidate.reason,
            channel_score: wc.candidate.channel_score,
            normalized_score: wc.normalized_score,
            weight: wc.weight,
            candidate_id: wc.candidate.id,
            timestamp: wc.candidate.timestamp,
            raw_details: wc.candidate.raw_details,
        }
    }

    #[must_use]
    pub fn weighted_score(&self) -> f64 {
        self.normalized_score * self.weight
    }
}

/// A bucket handed to the decision stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBucket {
    pub key: DedupKey,
    pub symbol: String,
    pub opened_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
    /// One entry per contributing channel, in channel order.
    pub contributions: Vec<Contribution>,
    /// Every reason seen in the bucket.
    pub reasons: BTreeSet<ReasonCode>,
    /// Channel whose reason is displayed.
    pub reason_channel: ChannelId,
    pub candidate_count: usize,
    pub exempt: bool,
    /// Resolved by a shutdown flush rather than by expiry.
    pub forced: bool,
}

impl ResolvedBucket {
    #[must_use]
    pub fn channels(&self) -> BTreeSet<ChannelId> {
        self.contributions.iter().map(|c| c.channel).collect()
    }

    /// Contribution whose reason is displayed.
    #[must_use]
    pub fn displayed(&self) -> Option<&Contribution> {
        self.contributions
            .iter()
            .find(|c| c.channel == self.reason_channel)
    }
}

#[derive(Debug)]
struct PendingBucket {
    key: DedupKey,
    generation: u64,
    opened_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    first_channel: ChannelId,
    contributions: BTreeMap<ChannelId, Contribution>,
    reasons: BTreeSet<ReasonCode>,
    candidate_count: usize,
    exempt: bool,
}

impl PendingBucket {
    fn open(key: DedupKey, generation: u64, deadline: DateTime<Utc>, wc: WeightedCandidate) -> Self {
        let opened_at = wc.candidate.timestamp;
        let mut bucket = Self {
            key,
            generation,
            opened_at,
            deadline,
            last_seen: opened_at,
            first_channel: wc.candidate.channel,
            contributions: BTreeMap::new(),
            reasons: BTreeSet::new(),
            candidate_count: 0,
            exempt: false,
        };
        bucket.merge(wc);
        bucket
    }

    fn merge(&mut self, wc: WeightedCandidate) {
        self.candidate_count += 1;
        self.exempt |= wc.candidate.is_priority_exempt();
        self.reasons.insert(wc.candidate.reason);
        if wc.candidate.timestamp > self.last_seen {
            self.last_seen = wc.candidate.timestamp;
        }
        let incoming = Contribution::from_weighted(wc);
        match self.contributions.get(&incoming.channel) {
            Some(existing) if existing.normalized_score >= incoming.normalized_score => {}
            _ => {
                self.contributions.insert(incoming.channel, incoming);
            }
        }
    }

    fn resolve(self, policy: ReasonPolicy, resolved_at: DateTime<Utc>, forced: bool) -> ResolvedBucket {
        let reason_channel = match policy {
            ReasonPolicy::FirstSeen => self.first_channel,
            ReasonPolicy::HighestScore => self
                .contributions
                .values()
                .fold(None::<&Contribution>, |best, c| match best {
                    Some(b) if b.normalized_score >= c.normalized_score => Some(b),
                    _ => Some(c),
                })
                .map_or(self.first_channel, |c| c.channel),
        };
        ResolvedBucket {
            symbol: self.key.symbol.clone(),
            key: self.key,
            opened_at: self.opened_at,
            last_seen: self.last_seen,
            resolved_at,
            contributions: self.contributions.into_values().collect(),
            reasons: self.reasons,
            reason_channel,
            candidate_count: self.candidate_count,
            exempt: self.exempt,
            forced,
        }
    }
}

type OpenKey = (String, u64);

#[derive(Debug, Default)]
struct Shard {
    open: HashMap<OpenKey, PendingBucket>,
    deadlines: BinaryHeap<Reverse<(DateTime<Utc>, u64, OpenKey)>>,
}

impl Shard {
    fn is_live(&self, generation: u64, key: &OpenKey) -> bool {
        self.open.get(key).is_some_and(|b| b.generation == generation)
    }

    /// Drops stale heap entries from the top.
    fn prune(&mut self) {
        while let Some(Reverse((_, generation, key))) = self.deadlines.peek() {
            if self.is_live(*generation, key) {
                break;
            }
            self.deadlines.pop();
        }
    }
}

/// Outcome of [`DedupEngine::offer`].
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub key: DedupKey,
    /// Merged into an already open bucket.
    pub merged: bool,
    /// A bucket resolved by this offer: the exempt bucket itself, or an
    /// overdue bucket displaced by a new one.
    pub resolved: Option<ResolvedBucket>,
}

pub struct DedupEngine {
    shards: Vec<Mutex<Shard>>,
    config: SharedConfig,
    generation: AtomicU64,
    metrics: Arc<EngineMetrics>,
}

impl DedupEngine {
    #[must_use]
    pub fn new(config: SharedConfig, shards: usize, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(Shard::default())).collect(),
            config,
            generation: AtomicU64::new(0),
            metrics,
        }
    }

    fn shard(&self, symbol: &str) -> &Mutex<Shard> {
        &self.shards[partition_for(symbol, self.shards.len())]
    }

    /// Offers a weighted candidate.
    pub fn offer(&self, wc: WeightedCandidate) -> Offer {
        let (window_ms, policy) = {
            let config = self.config.borrow();
            (config.dedup.window_ms, config.dedup.reason_policy)
        };
        let window = chrono::Duration::milliseconds(i64::try_from(window_ms).unwrap_or(i64::MAX));

        let symbol = wc.candidate.symbol.clone();
        let ts = wc.candidate.timestamp;
        let exempt = wc.candidate.is_priority_exempt();
        let open_key: OpenKey = (symbol.clone(), reason_hash(wc.candidate.reason));

        let mut shard = self.shard(&symbol).lock();

        let mut displaced = None;
        if let Some(bucket) = shard.open.get_mut(&open_key) {
            if exempt || ts < bucket.deadline {
                bucket.merge(wc);
                EngineMetrics::incr(&self.metrics.candidates_merged);
                let key = bucket.key.clone();
                let resolved = if exempt {
                    shard
                        .open
                        .remove(&open_key)
                        .map(|b| b.resolve(policy, ts, false))
                } else {
                    None
                };
                return Offer {
                    key,
                    merged: true,
                    resolved,
                };
            }
            // Overdue but not yet collected by the scheduler.
            displaced = shard.open.remove(&open_key).map(|b| {
                let deadline = b.deadline;
                b.resolve(policy, deadline, false)
            });
        }

        let key = DedupKey::derive(&symbol, wc.candidate.reason, ts, window_ms);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let bucket = PendingBucket::open(key.clone(), generation, ts + window, wc);

        let resolved = if exempt {
            debug_assert!(displaced.is_none());
            Some(bucket.resolve(policy, ts, false))
        } else {
            shard
                .deadlines
                .push(Reverse((bucket.deadline, generation, open_key.clone())));
            shard.open.insert(open_key, bucket);
            displaced
        };

        Offer {
            key,
            merged: false,
            resolved,
        }
    }

    /// Resolves every bucket whose deadline is at or before `now`.
    ///
    /// Results are ordered by deadline, then symbol.
    pub fn expire(&self, now: DateTime<Utc>) -> Vec<ResolvedBucket> {
        let policy = self.config.borrow().dedup.reason_policy;
        let mut out = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.lock();
            loop {
                shard.prune();
                let due = match shard.deadlines.peek() {
                    Some(Reverse((deadline, _, _))) => *deadline <= now,
                    None => false,
                };
                if !due {
                    break;
                }
                if let Some(Reverse((deadline, _, key))) = shard.deadlines.pop() {
                    if let Some(bucket) = shard.open.remove(&key) {
                        out.push(bucket.resolve(policy, deadline, false));
                    }
                }
            }
        }
        out.sort_by(|a, b| {
            (a.resolved_at, &a.symbol, a.key.reason_hash).cmp(&(b.resolved_at, &b.symbol, b.key.reason_hash))
        });
        out
    }

    /// Force-resolves every pending bucket (shutdown or end of replay).
    pub fn flush_all(&self, at: DateTime<Utc>) -> Vec<ResolvedBucket> {
        let policy = self.config.borrow().dedup.reason_policy;
        let mut out = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.lock();
            shard.deadlines.clear();
            out.extend(
                shard
                    .open
                    .drain()
                    .map(|(_, bucket)| {
                        let resolved_at = at.min(bucket.deadline).max(bucket.last_seen);
                        bucket.resolve(policy, resolved_at, true)
                    }),
            );
        }
        out.sort_by(|a, b| {
            (a.opened_at, &a.symbol, a.key.reason_hash).cmp(&(b.opened_at, &b.symbol, b.key.reason_hash))
        });
        out
    }

    /// Earliest pending deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.shards
            .iter()
            .filter_map(|shard| {
                let mut shard = shard.lock();
                shard.prune();
                shard.deadlines.peek().map(|Reverse((deadline, _, _))| *deadline)
            })
            .min()
    }

    /// Number of open buckets.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().open.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::normalize_with;
    use crate::detector::test_support::at_ms;
    use signalscan_core::{CandidateSignal, ChannelsConfig, ConfigWatcher, EngineConfig};

    fn engine(window_ms: u64, policy: ReasonPolicy) -> DedupEngine {
        let mut config = EngineConfig::default();
        config.dedup.window_ms = window_ms;
        config.dedup.reason_policy = policy;
        let (_w, rx) = ConfigWatcher::new(config);
        DedupEngine::new(rx, 4, Arc::new(EngineMetrics::new()))
    }

    fn wc(symbol: &str, ms: i64, channel: ChannelId, reason: ReasonCode, score: f64) -> WeightedCandidate {
        let c = CandidateSignal::new(channel, symbol, at_ms(ms), score, reason).unwrap();
        normalize_with(c, &ChannelsConfig::default())
    }

    // ============================================
    // Merging
    // ============================================

    #[test]
    fn correlated_channels_merge_into_one_bucket() {
        let dedup = engine(3_000, ReasonPolicy::HighestScore);
        let first = dedup.offer(wc("XYZ", 0, ChannelId::PriceSpike, ReasonCode::PriceSpikeUp, 55.0));
        assert!(!first.merged && first.resolved.is_none());
        let second = dedup.offer(wc("XYZ", 500, ChannelId::VolumeSpike, ReasonCode::VolumeSpike, 90.0));
        assert!(second.merged);
        assert_eq!(first.key, second.key);

        assert!(dedup.expire(at_ms(2_999)).is_empty());
        let resolved = dedup.expire(at_ms(3_000));
        assert_eq!(resolved.len(), 1);
        let bucket = &resolved[0];
        assert_eq!(bucket.channels().len(), 2);
        assert_eq!(bucket.reason_channel, ChannelId::VolumeSpike);
        assert_eq!(bucket.displayed().unwrap().reason, ReasonCode::VolumeSpike);
        assert_eq!(bucket.resolved_at, at_ms(3_000));
        assert_eq!(dedup.pending_len(), 0);
    }

    #[test]
    fn first_seen_policy_keeps_opening_reason() {
        let dedup = engine(3_000, ReasonPolicy::FirstSeen);
        dedup.offer(wc("XYZ", 0, ChannelId::PriceSpike, ReasonCode::PriceSpikeUp, 55.0));
        dedup.offer(wc("XYZ", 10, ChannelId::VolumeSpike, ReasonCode::VolumeSpike, 90.0));
        let bucket = dedup.flush_all(at_ms(100)).remove(0);
        assert_eq!(bucket.reason_channel, ChannelId::PriceSpike);
        assert!(bucket.forced);
    }

    #[test]
    fn thousand_duplicates_resolve_once() {
        let dedup = engine(3_000, ReasonPolicy::HighestScore);
        for i in 0..1_000 {
            dedup.offer(wc("XYZ", i, ChannelId::PriceSpike, ReasonCode::PriceSpikeUp, 60.0));
        }
        let resolved = dedup.expire(at_ms(10_000));
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].candidate_count, 1_000);
        assert_eq!(resolved[0].contributions.len(), 1);
        assert_eq!(dedup.metrics.snapshot().candidates_merged, 999);
    }

    #[test]
    fn different_families_and_symbols_stay_apart() {
        let dedup = engine(3_000, ReasonPolicy::HighestScore);
        dedup.offer(wc("XYZ", 0, ChannelId::PriceSpike, ReasonCode::PriceSpikeUp, 55.0));
        dedup.offer(wc("XYZ", 0, ChannelId::Crossover, ReasonCode::BullishCrossover, 55.0));
        dedup.offer(wc("ABC", 0, ChannelId::PriceSpike, ReasonCode::PriceSpikeUp, 55.0));
        assert_eq!(dedup.pending_len(), 3);
        assert_eq!(dedup.expire(at_ms(3_000)).len(), 3);
    }

    #[test]
    fn candidate_after_deadline_displaces_overdue_bucket() {
        let dedup = engine(1_000, ReasonPolicy::HighestScore);
        dedup.offer(wc("XYZ", 0, ChannelId::PriceSpike, ReasonCode::PriceSpikeUp, 55.0));
        let offer = dedup.offer(wc("XYZ", 1_000, ChannelId::PriceSpike, ReasonCode::PriceSpikeUp, 70.0));
        assert!(!offer.merged);
        let displaced = offer.resolved.unwrap();
        assert_eq!(displaced.opened_at, at_ms(0));
        assert_eq!(displaced.resolved_at, at_ms(1_000));
        assert_eq!(dedup.pending_len(), 1);
        // the displaced bucket's heap entry is stale and skipped
        assert_eq!(dedup.next_deadline(), Some(at_ms(2_000)));
    }

    // ============================================
    // Priority-exempt
    // ============================================

    #[test]
    fn exempt_candidate_resolves_immediately() {
        let dedup = engine(3_000, ReasonPolicy::HighestScore);
        let offer = dedup.offer(wc("ABC", 0, ChannelId::Halt, ReasonCode::Halt, 100.0));
        let bucket = offer.resolved.unwrap();
        assert!(bucket.exempt);
        assert_eq!(bucket.resolved_at, at_ms(0));
        assert_eq!(dedup.pending_len(), 0);
        assert!(dedup.next_deadline().is_none());
    }

    #[test]
    fn breaking_news_flushes_open_news_bucket() {
        let dedup = engine(3_000, ReasonPolicy::HighestScore);
        dedup.offer(wc("XYZ", 0, ChannelId::News, ReasonCode::News, 45.0));
        let offer = dedup.offer(wc("XYZ", 200, ChannelId::News, ReasonCode::BreakingNews, 80.0));
        assert!(offer.merged);
        let bucket = offer.resolved.unwrap();
        assert_eq!(bucket.candidate_count, 2);
        assert!(bucket.reasons.contains(&ReasonCode::News));
        assert_eq!(bucket.displayed().unwrap().reason, ReasonCode::BreakingNews);
        assert_eq!(dedup.pending_len(), 0);
    }

    // ============================================
    // Keys
    // ============================================

    #[test]
    fn key_time_bucket_is_floor_of_window() {
        let key = DedupKey::derive("XYZ", ReasonCode::VolumeSpike, at_ms(0), 3_000);
        let later = DedupKey::derive("XYZ", ReasonCode::PriceSpikeDown, at_ms(2_999), 3_000);
        assert_eq!(key.reason_hash, later.reason_hash);
        assert_eq!(
            key.time_bucket,
            at_ms(0).timestamp_millis().div_euclid(3_000)
        );
        assert!(key.to_string().starts_with("XYZ/"));
    }
}
