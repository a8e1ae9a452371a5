//! Volatility surge: short-horizon average true range expands to at least
//! `multiplier` times the long-horizon baseline.

use std::collections::HashMap;

use signalscan_core::{
    CandidateSignal, ChannelId, DetectorError, EventPayload, NormalizedEvent, ReasonCode,
    VolatilitySurgeConfig,
};

use super::{finite, round4, threshold_score, Detector, TriggerGate};
use crate::window::{AtrWindow, RollingWindowStore, WindowSpec};

pub struct VolatilitySurgeDetector {
    config: VolatilitySurgeConfig,
    short: RollingWindowStore,
    long: RollingWindowStore,
    prev_close: HashMap<String, f64>,
    gate: TriggerGate,
}

impl VolatilitySurgeDetector {
    #[must_use]
    pub fn new(config: VolatilitySurgeConfig) -> Self {
        Self {
            short: RollingWindowStore::new(
                WindowSpec::Count(config.short_window),
                config.short_window,
            ),
            long: RollingWindowStore::new(WindowSpec::Count(config.long_window), config.min_samples),
            prev_close: HashMap::new(),
            gate: TriggerGate::new(&config.common),
            config,
        }
    }
}

fn range_of(event: &NormalizedEvent) -> Option<(f64, f64, f64)> {
    match event.payload {
        EventPayload::Bar {
            high, low, close, ..
        } => Some((high, low, close)),
        EventPayload::Trade { price, .. } => Some((price, price, price)),
        _ => None,
    }
}

impl Detector for VolatilitySurgeDetector {
    fn channel(&self) -> ChannelId {
        ChannelId::VolatilitySurge
    }

    fn process(&mut self, event: &NormalizedEvent) -> Result<Vec<CandidateSignal>, DetectorError> {
        let Some((high, low, close)) = range_of(event) else {
            return Ok(Vec::new());
        };

        let prev = self.prev_close.get(&event.symbol).copied();
        let tr = AtrWindow::true_range(high, low, prev);
        let baseline = self.long.read(&event.symbol).ready();
        let short = self.short.update(&event.symbol, tr, event.timestamp)?.ready();
        self.long.update(&event.symbol, tr, event.timestamp)?;
        self.prev_close.insert(event.symbol.clone(), close);

        let (Some(short), Some(long)) = (short, baseline) else {
            return Ok(Vec::new());
        };
        if long.mean <= f64::EPSILON {
            return Ok(Vec::new());
        }

        let ratio = finite("atr_ratio", short.mean / long.mean)?;
        if ratio < self.config.multiplier || !self.gate.try_fire(event) {
            return Ok(Vec::new());
        }

        let candidate = CandidateSignal::new(
            ChannelId::VolatilitySurge,
            &event.symbol,
            event.timestamp,
            threshold_score(ratio, self.config.multiplier),
            ReasonCode::VolatilitySurge,
        )?
        .with_detail("short_atr", round4(short.mean))
        .with_detail("long_atr", round4(long.mean))
        .with_detail("ratio", round4(ratio));

        Ok(vec![candidate])
    }

    fn reset(&mut self, symbol: &str) {
        self.short.reset(symbol);
        self.long.reset(symbol);
        self.prev_close.remove(symbol);
        self.gate.reset(symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::test_support::*;

    fn detector() -> VolatilitySurgeDetector {
        VolatilitySurgeDetector::new(VolatilitySurgeConfig {
            short_window: 3,
            long_window: 20,
            min_samples: 10,
            multiplier: 2.0,
            ..VolatilitySurgeConfig::default()
        })
    }

    #[test]
    fn fires_when_ranges_widen() {
        let mut d = detector();
        for i in 0..12 {
            let out = d.process(&bar("XYZ", i * 60, 10.5, 10.0, 10.25, 1_000.0)).unwrap();
            assert!(out.is_empty());
        }
        let mut fired = Vec::new();
        for i in 12..15 {
            fired.extend(d.process(&bar("XYZ", i * 60, 12.0, 10.0, 11.0, 1_000.0)).unwrap());
        }
        assert!(!fired.is_empty());
        assert_eq!(fired[0].reason, ReasonCode::VolatilitySurge);
    }

    #[test]
    fn steady_ranges_are_quiet() {
        let mut d = detector();
        for i in 0..40 {
            assert!(d
                .process(&bar("XYZ", i * 60, 10.5, 10.0, 10.25, 1_000.0))
                .unwrap()
                .is_empty());
        }
    }
}
