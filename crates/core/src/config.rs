use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::events::Session;
use crate::signal::ChannelId;

/// Complete engine configuration.
///
/// Every field has a default, so a partial TOML file (or none at all) yields
/// a usable configuration. Call [`EngineConfig::validate`] before use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: RuntimeConfig,
    pub dedup: DedupConfig,
    pub suppression: SuppressionConfig,
    pub scoring: ScoringConfig,
    pub router: RouterConfig,
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of symbol partitions; one runner per partition per channel.
    pub partitions: usize,
    /// Per-symbol queue bound inside each channel runner.
    pub runner_queue_capacity: usize,
    /// Candidate bus capacity.
    pub bus_capacity: usize,
    /// Parallel decision workers (partitioned by symbol).
    pub decision_workers: usize,
    /// Grace period for draining in-flight events on shutdown.
    pub shutdown_grace_ms: u64,
    /// Log alerts instead of delivering them.
    pub dry_run: bool,
    /// Allowed symbols; empty means every symbol is accepted.
    pub universe: Vec<String>,
    /// Bound of the background audit writer queue.
    pub audit_queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            partitions: 4,
            runner_queue_capacity: 1024,
            bus_capacity: 4096,
            decision_workers: 4,
            shutdown_grace_ms: 2_000,
            dry_run: false,
            universe: Vec::new(),
            audit_queue_capacity: 8_192,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Returns true if the symbol is accepted by the universe allow-list.
    #[must_use]
    pub fn accepts_symbol(&self, symbol: &str) -> bool {
        self.universe.is_empty() || self.universe.iter().any(|s| s.eq_ignore_ascii_case(symbol))
    }
}

/// Which contribution's reason is displayed on a merged bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonPolicy {
    /// Channel with the highest individual score wins.
    #[default]
    HighestScore,
    /// First channel to open the bucket wins.
    FirstSeen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Time span during which correlated candidates merge.
    pub window_ms: u64,
    pub reason_policy: ReasonPolicy,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_ms: 3_000,
            reason_policy: ReasonPolicy::HighestScore,
        }
    }
}

impl DedupConfig {
    #[must_use]
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.window_ms).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressionConfig {
    /// Minimum time between emitted alerts for one (symbol, channel) pair.
    pub cooldown_secs: u64,
    /// Emitted alerts per symbol in any rolling 60 s window.
    pub max_alerts_per_minute: u32,
    /// Emitted alerts per symbol in any rolling hour.
    pub max_alerts_per_hour: u32,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            max_alerts_per_minute: 3,
            max_alerts_per_hour: 20,
        }
    }
}

impl SuppressionConfig {
    #[must_use]
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.cooldown_secs).unwrap_or(i64::MAX / 1_000))
    }
}

/// How contributing channel scores combine into a final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreCombination {
    /// Sum of weighted scores, clamped to 100.
    #[default]
    WeightedSum,
    /// Largest weighted score.
    Max,
    /// 100 * (1 - prod(1 - p_i)) with p_i = weighted score / 100.
    ProbabilisticOr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub combination: ScoreCombination,
    /// Minimum final score for emission.
    pub alert_threshold: f64,
    /// Scores at or above this are at least medium priority.
    pub medium_cutoff: f64,
    /// Scores at or above this are high priority.
    pub high_cutoff: f64,
    /// Upper bound on the enrichment boost.
    pub max_enrichment_boost: f64,
    pub enrichment_timeout_ms: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            combination: ScoreCombination::WeightedSum,
            alert_threshold: 60.0,
            medium_cutoff: 40.0,
            high_cutoff: 80.0,
            max_enrichment_boost: 10.0,
            enrichment_timeout_ms: 250,
        }
    }
}

impl ScoringConfig {
    #[must_use]
    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_millis(self.enrichment_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Queue bound of the normal-priority delivery path.
    pub normal_buffer: usize,
    /// Queue bound of the high/critical delivery path.
    pub critical_buffer: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            normal_buffer: 256,
            critical_buffer: 1,
        }
    }
}

// =============================================================================
// Channel configuration
// =============================================================================

/// Settings shared by every channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelCommon {
    pub enabled: bool,
    /// Weight applied by the normalizer.
    pub weight: f64,
    /// Scale correction applied to raw channel scores.
    pub scale: f64,
    /// Sessions in which the channel may trigger; empty means all.
    pub sessions: Vec<Session>,
    /// Minimum seconds between two triggers for the same symbol.
    pub retrigger_secs: u64,
}

impl Default for ChannelCommon {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 1.0,
            scale: 1.0,
            sessions: Vec::new(),
            retrigger_secs: 0,
        }
    }
}

impl ChannelCommon {
    /// Returns true if the channel may trigger in the given session.
    #[must_use]
    pub fn allows_session(&self, session: Session) -> bool {
        self.sessions.is_empty() || self.sessions.contains(&session)
    }

    #[must_use]
    pub fn retrigger(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.retrigger_secs).unwrap_or(i64::MAX / 1_000))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceSpikeConfig {
    #[serde(flatten)]
    pub common: ChannelCommon,
    pub window: usize,
    pub min_samples: usize,
    /// Percent deviation from the rolling mean that triggers.
    pub threshold_pct: f64,
}

impl Default for PriceSpikeConfig {
    fn default() -> Self {
        Self {
            common: ChannelCommon::default(),
            window: 20,
            min_samples: 10,
            threshold_pct: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSpikeConfig {
    #[serde(flatten)]
    pub common: ChannelCommon,
    pub window: usize,
    pub min_samples: usize,
    /// Ratio of current volume to rolling average volume that triggers.
    pub multiplier: f64,
}

impl Default for VolumeSpikeConfig {
    fn default() -> Self {
        Self {
            common: ChannelCommon::default(),
            window: 20,
            min_samples: 10,
            multiplier: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossoverConfig {
    #[serde(flatten)]
    pub common: ChannelCommon,
    pub fast_period: usize,
    pub slow_period: usize,
    /// Separation (percent of slow average) that maps to a full score.
    pub full_score_separation_pct: f64,
}

impl Default for CrossoverConfig {
    fn default() -> Self {
        Self {
            common: ChannelCommon::default(),
            fast_period: 9,
            slow_period: 21,
            full_score_separation_pct: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilitySurgeConfig {
    #[serde(flatten)]
    pub common: ChannelCommon,
    /// Samples in the short (recent) true-range average.
    pub short_window: usize,
    /// Samples in the long (baseline) true-range average.
    pub long_window: usize,
    pub min_samples: usize,
    /// Ratio of short to long average true range that triggers.
    pub multiplier: f64,
}

impl Default for VolatilitySurgeConfig {
    fn default() -> Self {
        Self {
            common: ChannelCommon::default(),
            short_window: 5,
            long_window: 30,
            min_samples: 20,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    #[serde(flatten)]
    pub common: ChannelCommon,
    pub lookback_secs: u64,
    pub min_samples: usize,
    /// Percent move across the lookback that triggers.
    pub threshold_pct: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            common: ChannelCommon::default(),
            lookback_secs: 300,
            min_samples: 5,
            threshold_pct: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanReversionConfig {
    #[serde(flatten)]
    pub common: ChannelCommon,
    pub window: usize,
    pub min_samples: usize,
    /// Absolute z-score that triggers.
    pub z_threshold: f64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            common: ChannelCommon::default(),
            window: 20,
            min_samples: 20,
            z_threshold: 2.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    #[serde(flatten)]
    pub common: ChannelCommon,
    /// Lookback for the new-high breakout.
    pub breakout_lookback_secs: u64,
    pub breakout_min_samples: usize,
    /// Minimum percent above the prior high.
    pub breakout_min_pct: f64,
    /// Length of the Bollinger/Keltner squeeze windows.
    pub squeeze_length: usize,
    pub bb_mult: f64,
    pub kc_mult: f64,
    /// Bars the squeeze must hold before a release counts.
    pub min_coil_bars: u32,
    /// Minimum move from the previous day's last price for a gap.
    pub gap_min_pct: f64,
    /// Samples in the current day before high-of-day breaks count.
    pub hod_min_samples: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            common: ChannelCommon::default(),
            breakout_lookback_secs: 300,
            breakout_min_samples: 10,
            breakout_min_pct: 0.5,
            squeeze_length: 20,
            bb_mult: 2.0,
            kc_mult: 1.5,
            min_coil_bars: 6,
            gap_min_pct: 10.0,
            hod_min_samples: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    #[serde(flatten)]
    pub common: ChannelCommon,
    /// Case-insensitive phrases that qualify a headline.
    pub keywords: Vec<String>,
    /// Phrases that disqualify a headline (spam, promotions).
    pub exclude_keywords: Vec<String>,
    pub breaking_max_age_mins: u64,
    pub general_max_age_hours: u64,
    /// How long unconfirmed news waits for a volume burst.
    pub correlation_window_secs: u64,
    pub volume_window: usize,
    pub volume_min_samples: usize,
    /// Volume ratio that confirms news activity.
    pub volume_confirm_multiplier: f64,
    /// Breaking news needs volume confirmation before it is exempt.
    pub require_volume_confirmation: bool,
    pub breaking_score: f64,
    pub general_score: f64,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            common: ChannelCommon::default(),
            keywords: default_news_keywords(),
            exclude_keywords: ["advertisement", "sponsored", "paid promotion", "affiliate link"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            breaking_max_age_mins: 30,
            general_max_age_hours: 48,
            correlation_window_secs: 600,
            volume_window: 20,
            volume_min_samples: 5,
            volume_confirm_multiplier: 2.0,
            require_volume_confirmation: false,
            breaking_score: 80.0,
            general_score: 45.0,
        }
    }
}

fn default_news_keywords() -> Vec<String> {
    [
        "files for bankruptcy",
        "bankruptcy protection",
        "trading halted",
        "halt pending news",
        "notice of delisting",
        "ceo resigns",
        "terminates merger agreement",
        "withdraws guidance",
        "sec charges",
        "sec investigation",
        "fda rejection",
        "fda approves",
        "receives fda approval",
        "breakthrough therapy designation",
        "fast track designation",
        "beats earnings estimates",
        "raises full year guidance",
        "wins contract worth",
        "upgrades to buy",
        "receives buyout offer",
        "agrees to be acquired",
        "definitive merger agreement",
        "announces acquisition of",
        "announces buyback program",
        "strategic partnership",
        "positive phase",
        "record revenue",
        "private placement",
        "letter of intent",
        "clinical trial",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HaltConfig {
    #[serde(flatten)]
    pub common: ChannelCommon,
}

/// Per-channel configuration, keyed by channel id in the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub price_spike: PriceSpikeConfig,
    pub volume_spike: VolumeSpikeConfig,
    pub crossover: CrossoverConfig,
    pub volatility_surge: VolatilitySurgeConfig,
    pub momentum: MomentumConfig,
    pub mean_reversion: MeanReversionConfig,
    pub pattern: PatternConfig,
    pub news: NewsConfig,
    pub halt: HaltConfig,
}

impl ChannelsConfig {
    /// Returns the shared settings of a channel.
    #[must_use]
    pub fn common(&self, channel: ChannelId) -> &ChannelCommon {
        match channel {
            ChannelId::PriceSpike => &self.price_spike.common,
            ChannelId::VolumeSpike => &self.volume_spike.common,
            ChannelId::Crossover => &self.crossover.common,
            ChannelId::VolatilitySurge => &self.volatility_surge.common,
            ChannelId::Momentum => &self.momentum.common,
            ChannelId::MeanReversion => &self.mean_reversion.common,
            ChannelId::Pattern => &self.pattern.common,
            ChannelId::News => &self.news.common,
            ChannelId::Halt => &self.halt.common,
        }
    }

    /// Returns mutable shared settings of a channel.
    pub fn common_mut(&mut self, channel: ChannelId) -> &mut ChannelCommon {
        match channel {
            ChannelId::PriceSpike => &mut self.price_spike.common,
            ChannelId::VolumeSpike => &mut self.volume_spike.common,
            ChannelId::Crossover => &mut self.crossover.common,
            ChannelId::VolatilitySurge => &mut self.volatility_surge.common,
            ChannelId::Momentum => &mut self.momentum.common,
            ChannelId::MeanReversion => &mut self.mean_reversion.common,
            ChannelId::Pattern => &mut self.pattern.common,
            ChannelId::News => &mut self.news.common,
            ChannelId::Halt => &mut self.halt.common,
        }
    }

    /// Returns true if the detector-specific settings of a channel differ.
    ///
    /// Weight, scale and the enable toggle are read live and are not
    /// considered a change that requires rebuilding the detector.
    #[must_use]
    pub fn detector_changed(&self, other: &Self, channel: ChannelId) -> bool {
        fn strip<T: Clone>(value: &T, common: impl Fn(&mut T) -> &mut ChannelCommon) -> T {
            let mut copy = value.clone();
            let c = common(&mut copy);
            c.enabled = true;
            c.weight = 1.0;
            c.scale = 1.0;
            copy
        }
        match channel {
            ChannelId::PriceSpike => {
                strip(&self.price_spike, |c| &mut c.common)
                    != strip(&other.price_spike, |c| &mut c.common)
            }
            ChannelId::VolumeSpike => {
                strip(&self.volume_spike, |c| &mut c.common)
                    != strip(&other.volume_spike, |c| &mut c.common)
            }
            ChannelId::Crossover => {
                strip(&self.crossover, |c| &mut c.common)
                    != strip(&other.crossover, |c| &mut c.common)
            }
            ChannelId::VolatilitySurge => {
                strip(&self.volatility_surge, |c| &mut c.common)
                    != strip(&other.volatility_surge, |c| &mut c.common)
            }
            ChannelId::Momentum => {
                strip(&self.momentum, |c| &mut c.common)
                    != strip(&other.momentum, |c| &mut c.common)
            }
            ChannelId::MeanReversion => {
                strip(&self.mean_reversion, |c| &mut c.common)
                    != strip(&other.mean_reversion, |c| &mut c.common)
            }
            ChannelId::Pattern => {
                strip(&self.pattern, |c| &mut c.common) != strip(&other.pattern, |c| &mut c.common)
            }
            ChannelId::News => {
                strip(&self.news, |c| &mut c.common) != strip(&other.news, |c| &mut c.common)
            }
            ChannelId::Halt => false,
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

impl EngineConfig {
    /// Checks ranges and cross-field consistency.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rt = &self.engine;
        positive_usize("engine.partitions", rt.partitions)?;
        positive_usize("engine.runner_queue_capacity", rt.runner_queue_capacity)?;
        positive_usize("engine.bus_capacity", rt.bus_capacity)?;
        positive_usize("engine.decision_workers", rt.decision_workers)?;
        positive_usize("engine.audit_queue_capacity", rt.audit_queue_capacity)?;

        if self.dedup.window_ms == 0 {
            return Err(ConfigError::invalid("dedup.window_ms", "must be greater than zero"));
        }

        let sup = &self.suppression;
        if sup.max_alerts_per_minute == 0 {
            return Err(ConfigError::invalid(
                "suppression.max_alerts_per_minute",
                "must be at least 1",
            ));
        }
        if sup.max_alerts_per_minute > sup.max_alerts_per_hour {
            return Err(ConfigError::Contradiction(format!(
                "max_alerts_per_minute ({}) exceeds max_alerts_per_hour ({})",
                sup.max_alerts_per_minute, sup.max_alerts_per_hour
            )));
        }

        let sc = &self.scoring;
        score_range("scoring.alert_threshold", sc.alert_threshold)?;
        score_range("scoring.medium_cutoff", sc.medium_cutoff)?;
        score_range("scoring.high_cutoff", sc.high_cutoff)?;
        if sc.medium_cutoff > sc.high_cutoff {
            return Err(ConfigError::Contradiction(format!(
                "medium_cutoff ({}) is above high_cutoff ({})",
                sc.medium_cutoff, sc.high_cutoff
            )));
        }
        if !sc.max_enrichment_boost.is_finite() || sc.max_enrichment_boost < 0.0 {
            return Err(ConfigError::invalid(
                "scoring.max_enrichment_boost",
                "must be a finite, non-negative number",
            ));
        }

        positive_usize("router.normal_buffer", self.router.normal_buffer)?;
        positive_usize("router.critical_buffer", self.router.critical_buffer)?;

        self.validate_channels()
    }

    fn validate_channels(&self) -> Result<(), ConfigError> {
        let ch = &self.channels;
        for channel in ChannelId::ALL {
            let common = ch.common(channel);
            let prefix = format!("channels.{channel}");
            if !common.weight.is_finite() || common.weight < 0.0 {
                return Err(ConfigError::invalid(
                    format!("{prefix}.weight"),
                    "must be a finite, non-negative number",
                ));
            }
            if !common.scale.is_finite() || common.scale <= 0.0 {
                return Err(ConfigError::invalid(
                    format!("{prefix}.scale"),
                    "must be a finite, positive number",
                ));
            }
        }

        window_fits("channels.price_spike", ch.price_spike.window, ch.price_spike.min_samples)?;
        positive_f64("channels.price_spike.threshold_pct", ch.price_spike.threshold_pct)?;

        window_fits("channels.volume_spike", ch.volume_spike.window, ch.volume_spike.min_samples)?;
        if !(ch.volume_spike.multiplier.is_finite() && ch.volume_spike.multiplier > 1.0) {
            return Err(ConfigError::invalid(
                "channels.volume_spike.multiplier",
                "must be greater than 1",
            ));
        }

        positive_usize("channels.crossover.fast_period", ch.crossover.fast_period)?;
        if ch.crossover.fast_period >= ch.crossover.slow_period {
            return Err(ConfigError::Contradiction(format!(
                "crossover fast_period ({}) must be below slow_period ({})",
                ch.crossover.fast_period, ch.crossover.slow_period
            )));
        }
        positive_f64(
            "channels.crossover.full_score_separation_pct",
            ch.crossover.full_score_separation_pct,
        )?;

        let vol = &ch.volatility_surge;
        positive_usize("channels.volatility_surge.short_window", vol.short_window)?;
        if vol.short_window >= vol.long_window {
            return Err(ConfigError::Contradiction(format!(
                "volatility_surge short_window ({}) must be below long_window ({})",
                vol.short_window, vol.long_window
            )));
        }
        window_fits("channels.volatility_surge", vol.long_window, vol.min_samples)?;
        if !(vol.multiplier.is_finite() && vol.multiplier > 1.0) {
            return Err(ConfigError::invalid(
                "channels.volatility_surge.multiplier",
                "must be greater than 1",
            ));
        }

        if ch.momentum.lookback_secs == 0 {
            return Err(ConfigError::invalid(
                "channels.momentum.lookback_secs",
                "must be greater than zero",
            ));
        }
        positive_usize("channels.momentum.min_samples", ch.momentum.min_samples)?;
        positive_f64("channels.momentum.threshold_pct", ch.momentum.threshold_pct)?;

        window_fits(
            "channels.mean_reversion",
            ch.mean_reversion.window,
            ch.mean_reversion.min_samples,
        )?;
        if ch.mean_reversion.min_samples < 2 {
            return Err(ConfigError::invalid(
                "channels.mean_reversion.min_samples",
                "needs at least 2 samples for a standard deviation",
            ));
        }
        positive_f64("channels.mean_reversion.z_threshold", ch.mean_reversion.z_threshold)?;

        let pat = &ch.pattern;
        if pat.breakout_lookback_secs == 0 {
            return Err(ConfigError::invalid(
                "channels.pattern.breakout_lookback_secs",
                "must be greater than zero",
            ));
        }
        positive_usize("channels.pattern.breakout_min_samples", pat.breakout_min_samples)?;
        if pat.squeeze_length < 2 {
            return Err(ConfigError::invalid(
                "channels.pattern.squeeze_length",
                "must be at least 2",
            ));
        }
        positive_f64("channels.pattern.bb_mult", pat.bb_mult)?;
        positive_f64("channels.pattern.kc_mult", pat.kc_mult)?;
        positive_f64("channels.pattern.gap_min_pct", pat.gap_min_pct)?;
        positive_usize("channels.pattern.hod_min_samples", pat.hod_min_samples)?;

        let news = &ch.news;
        if news.breaking_max_age_mins > news.general_max_age_hours.saturating_mul(60) {
            return Err(ConfigError::Contradiction(
                "news breaking_max_age_mins exceeds general_max_age_hours".to_string(),
            ));
        }
        window_fits("channels.news.volume", news.volume_window, news.volume_min_samples)?;
        score_range("channels.news.breaking_score", news.breaking_score)?;
        score_range("channels.news.general_score", news.general_score)?;

        Ok(())
    }
}

fn positive_usize(field: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::invalid(field, "must be greater than zero"))
    } else {
        Ok(())
    }
}

fn positive_f64(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be positive, got {value}")))
    }
}

fn score_range(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be within [0, 100], got {value}")))
    }
}

fn window_fits(prefix: &str, window: usize, min_samples: usize) -> Result<(), ConfigError> {
    positive_usize(&format!("{prefix}.window"), window)?;
    positive_usize(&format!("{prefix}.min_samples"), min_samples)?;
    if min_samples > window {
        return Err(ConfigError::Contradiction(format!(
            "{prefix}: min_samples ({min_samples}) exceeds window ({window})"
        )));
    }
    Ok(())
}
