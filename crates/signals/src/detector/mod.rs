//! Detection strategies.
//!
//! Every detector implements [`Detector`]: a synchronous `process` over one
//! normalized event that returns zero or more candidates. Detectors own their
//! configuration and their rolling state (one store per window type, keyed by
//! symbol) and are driven by exactly one runner, so they never need locks.

pub mod crossover;
pub mod halt;
pub mod mean_reversion;
pub mod momentum;
pub mod news;
pub mod pattern;
pub mod price_spike;
pub mod volatility;
pub mod volume_spike;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use signalscan_core::{
    CandidateSignal, ChannelCommon, ChannelId, ChannelsConfig, DetectorError, NormalizedEvent,
    Session,
};

pub use crossover::CrossoverDetector;
pub use halt::HaltDetector;
pub use mean_reversion::MeanReversionDetector;
pub use momentum::MomentumDetector;
pub use news::NewsDetector;
pub use pattern::PatternDetector;
pub use price_spike::PriceSpikeDetector;
pub use volatility::VolatilitySurgeDetector;
pub use volume_spike::VolumeSpikeDetector;

/// A single detection strategy.
pub trait Detector: Send {
    /// Channel this detector emits on.
    fn channel(&self) -> ChannelId;

    /// Processes one event and returns any candidates it triggers.
    ///
    /// # Errors
    /// Returns an error when the event cannot be applied to window state or a
    /// derived statistic is not finite. Callers treat errors as "no signal".
    fn process(&mut self, event: &NormalizedEvent) -> Result<Vec<CandidateSignal>, DetectorError>;

    /// Drops all state for a symbol, returning it to cold start.
    fn reset(&mut self, symbol: &str);
}

/// Runs a detector, converting panics into [`DetectorError::Panicked`].
///
/// After a panic the symbol's state is reset, since it may be half-updated.
///
/// # Errors
/// Returns the detector's own error, or `Panicked` if it unwound.
pub fn guarded_process(
    detector: &mut dyn Detector,
    event: &NormalizedEvent,
) -> Result<Vec<CandidateSignal>, DetectorError> {
    match panic::catch_unwind(AssertUnwindSafe(|| detector.process(event))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            detector.reset(&event.symbol);
            Err(DetectorError::Panicked(message))
        }
    }
}

/// Builds the detector for a channel from its configuration.
#[must_use]
pub fn build_detector(channel: ChannelId, config: &ChannelsConfig) -> Box<dyn Detector> {
    match channel {
        ChannelId::PriceSpike => Box::new(PriceSpikeDetector::new(config.price_spike.clone())),
        ChannelId::VolumeSpike => Box::new(VolumeSpikeDetector::new(config.volume_spike.clone())),
        ChannelId::Crossover => Box::new(CrossoverDetector::new(config.crossover.clone())),
        ChannelId::VolatilitySurge => {
            Box::new(VolatilitySurgeDetector::new(config.volatility_surge.clone()))
        }
        ChannelId::Momentum => Box::new(MomentumDetector::new(config.momentum.clone())),
        ChannelId::MeanReversion => {
            Box::new(MeanReversionDetector::new(config.mean_reversion.clone()))
        }
        ChannelId::Pattern => Box::new(PatternDetector::new(config.pattern.clone())),
        ChannelId::News => Box::new(NewsDetector::new(config.news.clone())),
        ChannelId::Halt => Box::new(HaltDetector::new(config.halt.clone())),
    }
}

/// Session filter plus per-symbol re-trigger guard.
///
/// Detectors keep updating their windows for every event and consult the
/// gate only when a trigger condition holds.
#[derive(Debug, Clone)]
pub struct TriggerGate {
    sessions: Vec<Session>,
    retrigger: chrono::Duration,
    last_trigger: HashMap<String, DateTime<Utc>>,
}

impl TriggerGate {
    #[must_use]
    pub fn new(common: &ChannelCommon) -> Self {
        Self {
            sessions: common.sessions.clone(),
            retrigger: common.retrigger(),
            last_trigger: HashMap::new(),
        }
    }

    /// Returns true (and records the trigger) if the detector may fire.
    pub fn try_fire(&mut self, event: &NormalizedEvent) -> bool {
        if !self.sessions.is_empty() && !self.sessions.contains(&event.session) {
            return false;
        }
        if let Some(last) = self.last_trigger.get(&event.symbol) {
            if event.timestamp < *last + self.retrigger {
                return false;
            }
        }
        self.last_trigger
            .insert(event.symbol.clone(), event.timestamp);
        true
    }

    /// Last trigger time for a symbol.
    #[must_use]
    pub fn last_trigger(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_trigger.get(symbol).copied()
    }

    pub fn reset(&mut self, symbol: &str) {
        self.last_trigger.remove(symbol);
    }
}

/// Maps `value / threshold` onto a score where the threshold itself scores 50.
pub(crate) fn threshold_score(value: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 0.0;
    }
    (50.0 * value.abs() / threshold).clamp(0.0, 100.0)
}

/// Returns `Err` when a derived statistic is not finite.
pub(crate) fn finite(name: &'static str, value: f64) -> Result<f64, DetectorError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DetectorError::NonFiniteStatistic { name, value })
    }
}

/// Rounds for raw details, keeping audit output readable.
pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, TimeZone, Utc};
    use signalscan_core::{EventPayload, NormalizedEvent, Session};

    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_736_000_000 + secs, 0).unwrap()
    }

    pub fn at_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_736_000_000_000 + ms).unwrap()
    }

    pub fn trade(symbol: &str, secs: i64, price: f64, size: f64) -> NormalizedEvent {
        NormalizedEvent::trade(symbol, at(secs), price, size)
    }

    pub fn bar(symbol: &str, secs: i64, high: f64, low: f64, close: f64, volume: f64) -> NormalizedEvent {
        NormalizedEvent::new(
            symbol,
            at(secs),
            Session::Regular,
            EventPayload::Bar {
                open: close,
                high,
                low,
                close,
                volume,
            },
        )
    }
}
