//! Price spike: the latest price deviates from the rolling median of the
//! preceding prices by at least `threshold_pct`.

use signalscan_core::{
    CandidateSignal, ChannelId, DetectorError, NormalizedEvent, PriceSpikeConfig, ReasonCode,
};

use super::{finite, round4, threshold_score, Detector, TriggerGate};
use crate::window::{RollingWindowStore, WindowSpec};

pub struct PriceSpikeDetector {
    config: PriceSpikeConfig,
    prices: RollingWindowStore,
    gate: TriggerGate,
}

impl PriceSpikeDetector {
    #[must_use]
    pub fn new(config: PriceSpikeConfig) -> Self {
        Self {
            prices: RollingWindowStore::new(WindowSpec::Count(config.window), config.min_samples),
            gate: TriggerGate::new(&config.common),
            config,
        }
    }
}

impl Detector for PriceSpikeDetector {
    fn channel(&self) -> ChannelId {
        ChannelId::PriceSpike
    }

    fn process(&mut self, event: &NormalizedEvent) -> Result<Vec<CandidateSignal>, DetectorError> {
        let Some(price) = event.price() else {
            return Ok(Vec::new());
        };

        // Compare against the window before this price joins it.
        let baseline = self.prices.median(&event.symbol);
        let samples = self.prices.read(&event.symbol).ready().map_or(0, |s| s.count);
        self.prices.update(&event.symbol, price, event.timestamp)?;

        let Some(median) = baseline else {
            return Ok(Vec::new());
        };
        if median <= 0.0 {
            return Ok(Vec::new());
        }

        let pct = finite("price_deviation_pct", (price - median) / median * 100.0)?;
        if pct.abs() < self.config.threshold_pct || !self.gate.try_fire(event) {
            return Ok(Vec::new());
        }

        let reason = if pct > 0.0 {
            ReasonCode::PriceSpikeUp
        } else {
            ReasonCode::PriceSpikeDown
        };
        let candidate = CandidateSignal::new(
            ChannelId::PriceSpike,
            &event.symbol,
            event.timestamp,
            threshold_score(pct, self.config.threshold_pct),
            reason,
        )?
        .with_detail("price", price)
        .with_detail("rolling_median", round4(median))
        .with_detail("deviation_pct", round4(pct))
        .with_detail("samples", samples);

        Ok(vec![candidate])
    }

    fn reset(&mut self, symbol: &str) {
        self.prices.reset(symbol);
        self.gate.reset(symbol);
    }
}
