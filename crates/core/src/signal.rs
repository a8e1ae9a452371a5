//! Candidate signals, alerts and audit records.
//!
//! A [`CandidateSignal`] is an unconfirmed detection produced by exactly one
//! detector invocation. Candidates are merged, suppressed and scored into at
//! most one [`Alert`] per dedup bucket. Every candidate and every decision is
//! also handed to the audit sink as an [`AuditRecord`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DetectorError;

/// Opaque detector output attached to candidates and alerts.
pub type RawDetails = BTreeMap<String, Value>;

/// Identifier of a detection channel (one per detector strategy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelId {
    PriceSpike,
    VolumeSpike,
    Crossover,
    VolatilitySurge,
    Momentum,
    MeanReversion,
    Pattern,
    News,
    Halt,
}

impl ChannelId {
    pub const COUNT: usize = 9;

    /// All channels, in registry order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::PriceSpike,
        Self::VolumeSpike,
        Self::Crossover,
        Self::VolatilitySurge,
        Self::Momentum,
        Self::MeanReversion,
        Self::Pattern,
        Self::News,
        Self::Halt,
    ];

    /// Returns the config/log name of the channel.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PriceSpike => "price_spike",
            Self::VolumeSpike => "volume_spike",
            Self::Crossover => "crossover",
            Self::VolatilitySurge => "volatility_surge",
            Self::Momentum => "momentum",
            Self::MeanReversion => "mean_reversion",
            Self::Pattern => "pattern",
            Self::News => "news",
            Self::Halt => "halt",
        }
    }

    /// Dense index, used for per-channel counters.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a detector fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    PriceSpikeUp,
    PriceSpikeDown,
    VolumeSpike,
    BullishCrossover,
    BearishCrossover,
    VolatilitySurge,
    MomentumUp,
    MomentumDown,
    Overbought,
    Oversold,
    NewHigh,
    SqueezeFired,
    /// Opened the trading day far above the previous day's last price.
    GapUp,
    GapDown,
    /// Broke back above the day's high.
    HighOfDay,
    /// Keyword-matched news inside the general age window.
    News,
    /// News followed by a volume burst inside the correlation window.
    NewsCorrelated,
    /// Confirmed breaking news.
    BreakingNews,
    Halt,
    Resume,
}

impl ReasonCode {
    /// Returns the snake_case name of the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PriceSpikeUp => "price_spike_up",
            Self::PriceSpikeDown => "price_spike_down",
            Self::VolumeSpike => "volume_spike",
            Self::BullishCrossover => "bullish_crossover",
            Self::BearishCrossover => "bearish_crossover",
            Self::VolatilitySurge => "volatility_surge",
            Self::MomentumUp => "momentum_up",
            Self::MomentumDown => "momentum_down",
            Self::Overbought => "overbought",
            Self::Oversold => "oversold",
            Self::NewHigh => "new_high",
            Self::SqueezeFired => "squeeze_fired",
            Self::GapUp => "gap_up",
            Self::GapDown => "gap_down",
            Self::HighOfDay => "high_of_day",
            Self::News => "news",
            Self::NewsCorrelated => "news_correlated",
            Self::BreakingNews => "breaking_news",
            Self::Halt => "halt",
            Self::Resume => "resume",
        }
    }

    /// Reason family used as the normalized reason of a dedup key.
    ///
    /// Correlated reasons share a family so that, for example, a price spike
    /// and the volume burst behind it collapse into one bucket.
    #[must_use]
    pub const fn family(self) -> &'static str {
        match self {
            Self::PriceSpikeUp
            | Self::PriceSpikeDown
            | Self::VolumeSpike
            | Self::VolatilitySurge
            | Self::MomentumUp
            | Self::MomentumDown
            | Self::NewHigh
            | Self::SqueezeFired
            | Self::GapUp
            | Self::GapDown
            | Self::HighOfDay => "price_action",
            Self::BullishCrossover | Self::BearishCrossover => "trend",
            Self::Overbought | Self::Oversold => "reversal",
            Self::News | Self::NewsCorrelated | Self::BreakingNews => "news",
            Self::Halt => "halt",
            Self::Resume => "resume",
        }
    }

    /// Halt/resume and confirmed breaking news bypass dedup delay,
    /// cooldowns and rate caps.
    #[must_use]
    pub const fn is_priority_exempt(self) -> bool {
        matches!(self, Self::Halt | Self::Resume | Self::BreakingNews)
    }

    /// Halt and news reasons are never shed by a backlogged candidate bus.
    #[must_use]
    pub const fn is_shed_protected(self) -> bool {
        matches!(
            self,
            Self::Halt | Self::Resume | Self::News | Self::NewsCorrelated | Self::BreakingNews
        )
    }

    /// Halt and resume force critical priority.
    #[must_use]
    pub const fn is_halt_class(self) -> bool {
        matches!(self, Self::Halt | Self::Resume)
    }

    /// Human-readable description used in alert summaries.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::PriceSpikeUp => "Price spiked above its rolling average",
            Self::PriceSpikeDown => "Price dropped below its rolling average",
            Self::VolumeSpike => "Volume surged above its rolling average",
            Self::BullishCrossover => "Fast average crossed above slow average",
            Self::BearishCrossover => "Fast average crossed below slow average",
            Self::VolatilitySurge => "Volatility expanded sharply",
            Self::MomentumUp => "Strong upward momentum",
            Self::MomentumDown => "Strong downward momentum",
            Self::Overbought => "Stretched above the mean (reversal risk)",
            Self::Oversold => "Stretched below the mean (reversal risk)",
            Self::NewHigh => "Broke out to a new high",
            Self::SqueezeFired => "Volatility squeeze released",
            Self::GapUp => "Gapped up from the previous close",
            Self::GapDown => "Gapped down from the previous close",
            Self::HighOfDay => "Broke the high of day",
            Self::News => "Keyword news",
            Self::NewsCorrelated => "News confirmed by a volume burst",
            Self::BreakingNews => "Breaking news",
            Self::Halt => "Trading halted",
            Self::Resume => "Trading resumed",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name-based id: the same detection replayed twice gets the same id.
fn candidate_id(
    symbol: &str,
    channel: ChannelId,
    reason: ReasonCode,
    timestamp: DateTime<Utc>,
    score: f64,
) -> Uuid {
    let nanos = timestamp.timestamp_nanos_opt().unwrap_or_else(|| timestamp.timestamp_millis());
    let name = format!("{symbol}|{channel}|{reason}|{nanos}|{:016x}", score.to_bits());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

/// An unconfirmed detection emitted by one channel before aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub id: Uuid,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "channel_id")]
    pub channel: ChannelId,
    /// Trigger magnitude in [0, 100].
    pub channel_score: f64,
    pub reason: ReasonCode,
    #[serde(default)]
    pub raw_details: RawDetails,
}

impl CandidateSignal {
    /// Creates a candidate, clamping the score to [0, 100].
    ///
    /// # Errors
    /// Returns an error if the score is NaN or infinite.
    pub fn new(
        channel: ChannelId,
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        score: f64,
        reason: ReasonCode,
    ) -> Result<Self, DetectorError> {
        if !score.is_finite() {
            return Err(DetectorError::NonFiniteStatistic {
                name: "channel_score",
                value: score,
            });
        }
        let symbol = symbol.into();
        let score = score.clamp(0.0, 100.0);
        Ok(Self {
            id: candidate_id(&symbol, channel, reason, timestamp, score),
            symbol,
            timestamp,
            channel,
            channel_score: score,
            reason,
            raw_details: RawDetails::new(),
        })
    }

    /// Adds a raw detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.raw_details.insert(key.into(), value.into());
        self
    }

    /// Returns true if this candidate bypasses dedup delay and suppression.
    #[must_use]
    pub const fn is_priority_exempt(&self) -> bool {
        self.reason.is_priority_exempt()
    }
}

/// Alert priority, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// High and critical alerts take the router's fast path.
    #[must_use]
    pub const fn is_fast_path(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scored decision handed to the output boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    /// Contributing channels; never empty.
    pub channels: BTreeSet<ChannelId>,
    pub final_score: f64,
    pub priority: Priority,
    /// Reason of the winning (displayed) contribution.
    pub reason: ReasonCode,
    pub summary: String,
    #[serde(default)]
    pub raw_details: RawDetails,
}

/// Why a resolved bucket was suppressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuppressionReason {
    /// The (symbol, channel) pair emitted too recently.
    Cooldown { channel: ChannelId, remaining_ms: i64 },
    /// Per-minute emit cap reached.
    MinuteCap { limit: u32 },
    /// Per-hour emit cap reached.
    HourCap { limit: u32 },
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cooldown {
                channel,
                remaining_ms,
            } => write!(f, "cooldown on {channel} ({remaining_ms} ms remaining)"),
            Self::MinuteCap { limit } => write!(f, "per-minute cap of {limit} reached"),
            Self::HourCap { limit } => write!(f, "per-hour cap of {limit} reached"),
        }
    }
}

/// Final disposition of a resolved bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    /// Alert handed to the delivery boundary.
    Emitted,
    /// Alert would have been emitted but dry-run mode is active.
    DryRun,
    /// Scored below threshold; kept for the audit trail only.
    AuditOnly,
    /// Dropped by cooldown or rate caps.
    Suppressed { reason: SuppressionReason },
    /// Resolving or scoring failed.
    DecisionError { error: String },
}

/// Audit entry for one resolved bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub symbol: String,
    pub dedup_key: String,
    pub channels: BTreeSet<ChannelId>,
    pub candidate_count: usize,
    #[serde(flatten)]
    pub disposition: Disposition,
    pub alert: Option<Alert>,
    pub recorded_at: DateTime<Utc>,
}

impl DecisionRecord {
    /// The alert handed to delivery, if the bucket was emitted.
    #[must_use]
    pub fn emitted_alert(&self) -> Option<&Alert> {
        match self.disposition {
            Disposition::Emitted => self.alert.as_ref(),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_suppressed(&self) -> bool {
        matches!(self.disposition, Disposition::Suppressed { .. })
    }
}

/// Entity handed to the persistence boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum AuditRecord {
    Candidate(CandidateSignal),
    Decision(DecisionRecord),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_score_is_clamped() {
        let c = CandidateSignal::new(
            ChannelId::VolumeSpike,
            "XYZ",
            Utc::now(),
            250.0,
            ReasonCode::VolumeSpike,
        )
        .unwrap();
        assert!((c.channel_score - 100.0).abs() < f64::EPSILON);

        let c = CandidateSignal::new(
            ChannelId::VolumeSpike,
            "XYZ",
            Utc::now(),
            -3.0,
            ReasonCode::VolumeSpike,
        )
        .unwrap();
        assert!(c.channel_score.abs() < f64::EPSILON);
    }

    #[test]
    fn candidate_rejects_nan_score() {
        let result = CandidateSignal::new(
            ChannelId::PriceSpike,
            "XYZ",
            Utc::now(),
            f64::NAN,
            ReasonCode::PriceSpikeUp,
        );
        assert!(result.is_err());
    }

    #[test]
    fn candidate_ids_are_stable_across_runs() {
        let at = Utc::now();
        let a = CandidateSignal::new(ChannelId::PriceSpike, "XYZ", at, 70.0, ReasonCode::PriceSpikeUp).unwrap();
        let b = CandidateSignal::new(ChannelId::PriceSpike, "XYZ", at, 70.0, ReasonCode::PriceSpikeUp).unwrap();
        let c = CandidateSignal::new(ChannelId::VolumeSpike, "XYZ", at, 70.0, ReasonCode::VolumeSpike).unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn exempt_reasons() {
        assert!(ReasonCode::Halt.is_priority_exempt());
        assert!(ReasonCode::Resume.is_priority_exempt());
        assert!(ReasonCode::BreakingNews.is_priority_exempt());
        assert!(!ReasonCode::News.is_priority_exempt());
        assert!(!ReasonCode::PriceSpikeUp.is_priority_exempt());

        assert!(ReasonCode::News.is_shed_protected());
        assert!(ReasonCode::NewsCorrelated.is_shed_protected());
        assert!(!ReasonCode::VolumeSpike.is_shed_protected());
    }

    #[test]
    fn price_and_volume_share_a_family() {
        assert_eq!(ReasonCode::PriceSpikeUp.family(), ReasonCode::VolumeSpike.family());
        assert_ne!(ReasonCode::Halt.family(), ReasonCode::Resume.family());
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert!(Priority::High.is_fast_path());
        assert!(!Priority::Medium.is_fast_path());
    }

    #[test]
    fn channel_index_is_dense() {
        for (i, channel) in ChannelId::ALL.iter().enumerate() {
            assert_eq!(channel.index(), i);
        }
    }

    #[test]
    fn audit_record_serializes_with_tag() {
        let record = AuditRecord::Decision(DecisionRecord {
            symbol: "XYZ".to_string(),
            dedup_key: "XYZ/price_action/0".to_string(),
            channels: BTreeSet::from([ChannelId::PriceSpike]),
            candidate_count: 1,
            disposition: Disposition::Suppressed {
                reason: SuppressionReason::MinuteCap { limit: 3 },
            },
            alert: None,
            recorded_at: Utc::now(),
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["record"], "decision");
        assert_eq!(json["disposition"], "suppressed");
        assert_eq!(json["reason"]["kind"], "minute_cap");
    }
}
