//! Mean reversion: price stretched `z_threshold` standard deviations away
//! from its rolling mean. Fires on entry into the overbought or oversold
//! zone; staying in the zone does not re-fire.

use std::collections::HashMap;

use signalscan_core::{
    CandidateSignal, ChannelId, DetectorError, MeanReversionConfig, NormalizedEvent, ReasonCode,
};

use super::{finite, round4, threshold_score, Detector, TriggerGate};
use crate::window::{RollingWindowStore, WindowSpec};

pub struct MeanReversionDetector {
    config: MeanReversionConfig,
    prices: RollingWindowStore,
    zones: HashMap<String, ReasonCode>,
    gate: TriggerGate,
}

impl MeanReversionDetector {
    #[must_use]
    pub fn new(config: MeanReversionConfig) -> Self {
        Self {
            prices: RollingWindowStore::new(WindowSpec::Count(config.window), config.min_samples),
            zones: HashMap::new(),
            gate: TriggerGate::new(&config.common),
            config,
        }
    }
}

impl Detector for MeanReversionDetector {
    fn channel(&self) -> ChannelId {
        ChannelId::MeanReversion
    }

    fn process(&mut self, event: &NormalizedEvent) -> Result<Vec<CandidateSignal>, DetectorError> {
        let Some(price) = event.price() else {
            return Ok(Vec::new());
        };

        let baseline = self.prices.read(&event.symbol).ready();
        self.prices.update(&event.symbol, price, event.timestamp)?;
        let Some(stats) = baseline else {
            return Ok(Vec::new());
        };
        if stats.stddev <= f64::EPSILON {
            return Ok(Vec::new());
        }

        let z = finite("zscore", (price - stats.mean) / stats.stddev)?;
        let zone = if z >= self.config.z_threshold {
            ReasonCode::Overbought
        } else if z <= -self.config.z_threshold {
            ReasonCode::Oversold
        } else {
            self.zones.remove(&event.symbol);
            return Ok(Vec::new());
        };

        if self.zones.insert(event.symbol.clone(), zone) == Some(zone) || !self.gate.try_fire(event) {
            return Ok(Vec::new());
        }

        let candidate = CandidateSignal::new(
            ChannelId::MeanReversion,
            &event.symbol,
            event.timestamp,
            threshold_score(z, self.config.z_threshold),
            zone,
        )?
        .with_detail("zscore", round4(z))
        .with_detail("mean", round4(stats.mean))
        .with_detail("stddev", round4(stats.stddev));

        Ok(vec![candidate])
    }

    fn reset(&mut self, symbol: &str) {
        self.prices.reset(symbol);
        self.zones.remove(symbol);
        self.gate.reset(symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::test_support::*;

    fn detector() -> MeanReversionDetector {
        MeanReversionDetector::new(MeanReversionConfig {
            window: 10,
            min_samples: 10,
            z_threshold: 2.0,
            ..MeanReversionConfig::default()
        })
    }

    fn warm(d: &mut MeanReversionDetector) {
        for i in 0..10 {
            let price = if i % 2 == 0 { 99.0 } else { 101.0 };
            assert!(d.process(&trade("XYZ", i, price, 1.0)).unwrap().is_empty());
        }
    }

    #[test]
    fn overbought_fires_once_while_stretched() {
        let mut d = detector();
        warm(&mut d);
        let out = d.process(&trade("XYZ", 10, 104.0, 1.0)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].reason, ReasonCode::Overbought);
        assert!(d.process(&trade("XYZ", 11, 106.0, 1.0)).unwrap().is_empty());
    }

    #[test]
    fn oversold_fires() {
        let mut d = detector();
        warm(&mut d);
        let out = d.process(&trade("XYZ", 10, 96.0, 1.0)).unwrap();
        assert_eq!(out[0].reason, ReasonCode::Oversold);
    }

    #[test]
    fn flat_series_has_no_deviation() {
        let mut d = detector();
        for i in 0..15 {
            assert!(d.process(&trade("XYZ", i, 50.0, 1.0)).unwrap().is_empty());
        }
    }
}
