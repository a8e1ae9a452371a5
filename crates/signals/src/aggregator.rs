//! Per-channel score normalization.
//!
//! Rescales raw channel scores with the configured `scale` and attaches the
//! configured `weight`. Identity fields are untouched. The weight table is
//! read from the live config on every call, so reloads apply immediately.

use signalscan_core::{CandidateSignal, ChannelsConfig, SharedConfig};

/// A candidate with its normalized score and channel weight.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedCandidate {
    pub candidate: CandidateSignal,
    /// `channel_score * scale`, clamped to [0, 100].
    pub normalized_score: f64,
    pub weight: f64,
}

impl WeightedCandidate {
    /// Normalized score multiplied by weight.
    #[must_use]
    pub fn weighted_score(&self) -> f64 {
        self.normalized_score * self.weight
    }
}

/// Normalizes a candidate against a channel table.
#[must_use]
pub fn normalize_with(candidate: CandidateSignal, channels: &ChannelsConfig) -> WeightedCandidate {
    let common = channels.common(candidate.channel);
    let normalized_score = (candidate.channel_score * common.scale).clamp(0.0, 100.0);
    WeightedCandidate {
        weight: common.weight,
        normalized_score,
        candidate,
    }
}

#[derive(Clone)]
pub struct Normalizer {
    config: SharedConfig,
}

impl Normalizer {
    #[must_use]
    pub fn new(config: SharedConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn normalize(&self, candidate: CandidateSignal) -> WeightedCandidate {
        let config = self.config.borrow();
        normalize_with(candidate, &config.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::test_support::at;
    use signalscan_core::{ChannelId, ConfigWatcher, EngineConfig, ReasonCode};

    fn spike(score: f64) -> CandidateSignal {
        CandidateSignal::new(ChannelId::PriceSpike, "XYZ", at(0), score, ReasonCode::PriceSpikeUp)
            .unwrap()
    }

    #[test]
    fn defaults_are_identity() {
        let (_w, rx) = ConfigWatcher::new(EngineConfig::default());
        let c = spike(40.0);
        let id = c.id;
        let wc = Normalizer::new(rx).normalize(c);
        assert!((wc.normalized_score - 40.0).abs() < 1e-12);
        assert!((wc.weight - 1.0).abs() < 1e-12);
        assert_eq!(wc.candidate.id, id);
    }

    #[test]
    fn applies_scale_and_weight_from_reloaded_config() {
        let (watcher, rx) = ConfigWatcher::new(EngineConfig::default());
        let normalizer = Normalizer::new(rx);

        let mut config = EngineConfig::default();
        config.channels.price_spike.common.scale = 3.0;
        config.channels.price_spike.common.weight = 0.5;
        watcher.publish(config).unwrap();

        let wc = normalizer.normalize(spike(40.0));
        assert!((wc.normalized_score - 100.0).abs() < 1e-12);
        assert!((wc.weighted_score() - 50.0).abs() < 1e-12);
        assert!((wc.candidate.channel_score - 40.0).abs() < 1e-12);
    }
}
