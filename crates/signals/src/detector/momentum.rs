//! Momentum: percent change from the oldest price inside the lookback window
//! to the latest price. Edge-triggered, so a sustained move fires once and
//! re-arms only after the change falls back under the threshold.

use std::collections::HashSet;

use chrono::Duration;
use signalscan_core::{
    CandidateSignal, ChannelId, DetectorError, MomentumConfig, NormalizedEvent, ReasonCode,
};

use super::{finite, round4, threshold_score, Detector, TriggerGate};
use crate::window::{RollingWindowStore, WindowSpec};

pub struct MomentumDetector {
    config: MomentumConfig,
    prices: RollingWindowStore,
    extended: HashSet<String>,
    gate: TriggerGate,
}

impl MomentumDetector {
    #[must_use]
    pub fn new(config: MomentumConfig) -> Self {
        let lookback = Duration::seconds(i64::try_from(config.lookback_secs).unwrap_or(i64::MAX / 1_000));
        Self {
            prices: RollingWindowStore::new(WindowSpec::Duration(lookback), config.min_samples),
            extended: HashSet::new(),
            gate: TriggerGate::new(&config.common),
            config,
        }
    }
}

impl Detector for MomentumDetector {
    fn channel(&self) -> ChannelId {
        ChannelId::Momentum
    }

    fn process(&mut self, event: &NormalizedEvent) -> Result<Vec<CandidateSignal>, DetectorError> {
        let Some(price) = event.price() else {
            return Ok(Vec::new());
        };

        let volume = event.volume().unwrap_or(0.0);
        let Some(stats) = self
            .prices
            .update_weighted(&event.symbol, price, volume, event.timestamp)?
            .ready()
        else {
            return Ok(Vec::new());
        };
        if stats.first <= 0.0 {
            return Ok(Vec::new());
        }

        let change_pct = finite("momentum_pct", (stats.last - stats.first) / stats.first * 100.0)?;
        if change_pct.abs() < self.config.threshold_pct {
            self.extended.remove(&event.symbol);
            return Ok(Vec::new());
        }
        if !self.extended.insert(event.symbol.clone()) || !self.gate.try_fire(event) {
            return Ok(Vec::new());
        }

        let reason = if change_pct > 0.0 {
            ReasonCode::MomentumUp
        } else {
            ReasonCode::MomentumDown
        };
        let vwap_distance_pct = match stats.vwap {
            Some(vwap) if vwap > 0.0 => Some(round4(finite("vwap_distance", (price - vwap) / vwap * 100.0)?)),
            _ => None,
        };
        let candidate = CandidateSignal::new(
            ChannelId::Momentum,
            &event.symbol,
            event.timestamp,
            threshold_score(change_pct, self.config.threshold_pct),
            reason,
        )?
        .with_detail("change_pct", round4(change_pct))
        .with_detail("from_price", stats.first)
        .with_detail("lookback_secs", self.config.lookback_secs)
        .with_detail("vwap", stats.vwap.map(round4))
        .with_detail("vwap_distance_pct", vwap_distance_pct);

        Ok(vec![candidate])
    }

    fn reset(&mut self, symbol: &str) {
        self.prices.reset(symbol);
        self.extended.remove(symbol);
        self.gate.reset(symbol);
    }
}
