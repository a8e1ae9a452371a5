//! Volume spike: the latest trade size or bar volume is at least
//! `multiplier` times the rolling average of the preceding ones.

use signalscan_core::{
    CandidateSignal, ChannelId, DetectorError, NormalizedEvent, ReasonCode, VolumeSpikeConfig,
};

use super::{finite, round4, threshold_score, Detector, TriggerGate};
use crate::window::{RollingWindowStore, WindowSpec};

pub struct VolumeSpikeDetector {
    config: VolumeSpikeConfig,
    volumes: RollingWindowStore,
    gate: TriggerGate,
}

impl VolumeSpikeDetector {
    #[must_use]
    pub fn new(config: VolumeSpikeConfig) -> Self {
        Self {
            volumes: RollingWindowStore::new(WindowSpec::Count(config.window), config.min_samples),
            gate: TriggerGate::new(&config.common),
            config,
        }
    }
}

impl Detector for VolumeSpikeDetector {
    fn channel(&self) -> ChannelId {
        ChannelId::VolumeSpike
    }

    fn process(&mut self, event: &NormalizedEvent) -> Result<Vec<CandidateSignal>, DetectorError> {
        let Some(volume) = event.volume() else {
            return Ok(Vec::new());
        };

        let baseline = self.volumes.read(&event.symbol).ready();
        self.volumes.update(&event.symbol, volume, event.timestamp)?;

        let Some(stats) = baseline else {
            return Ok(Vec::new());
        };
        if stats.mean <= f64::EPSILON {
            return Ok(Vec::new());
        }

        let ratio = finite("volume_ratio", volume / stats.mean)?;
        if ratio < self.config.multiplier || !self.gate.try_fire(event) {
            return Ok(Vec::new());
        }

        let candidate = CandidateSignal::new(
            ChannelId::VolumeSpike,
            &event.symbol,
            event.timestamp,
            threshold_score(ratio, self.config.multiplier),
            ReasonCode::VolumeSpike,
        )?
        .with_detail("volume", volume)
        .with_detail("average_volume", round4(stats.mean))
        .with_detail("ratio", round4(ratio));

        Ok(vec![candidate])
    }

    fn reset(&mut self, symbol: &str) {
        self.volumes.reset(symbol);
        self.gate.reset(symbol);
    }
}
