//! Moving-average crossover.
//!
//! Tracks a fast and a slow simple moving average per symbol and fires when
//! the sign of `fast - slow` flips. A flat reading (exact equality) keeps the
//! previous side.

use std::collections::HashMap;

use signalscan_core::{
    CandidateSignal, ChannelId, CrossoverConfig, DetectorError, NormalizedEvent, ReasonCode,
};

use super::{finite, round4, Detector, TriggerGate};
use crate::window::{RollingWindowStore, WindowSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Above,
    Below,
}

pub struct CrossoverDetector {
    config: CrossoverConfig,
    fast: RollingWindowStore,
    slow: RollingWindowStore,
    sides: HashMap<String, Side>,
    gate: TriggerGate,
}

impl CrossoverDetector {
    #[must_use]
    pub fn new(config: CrossoverConfig) -> Self {
        Self {
            fast: RollingWindowStore::new(
                WindowSpec::Count(config.fast_period),
                config.fast_period,
            ),
            slow: RollingWindowStore::new(
                WindowSpec::Count(config.slow_period),
                config.slow_period,
            ),
            sides: HashMap::new(),
            gate: TriggerGate::new(&config.common),
            config,
        }
    }
}

impl Detector for CrossoverDetector {
    fn channel(&self) -> ChannelId {
        ChannelId::Crossover
    }

    fn process(&mut self, event: &NormalizedEvent) -> Result<Vec<CandidateSignal>, DetectorError> {
        let Some(price) = event.price() else {
            return Ok(Vec::new());
        };

        let fast = self.fast.update(&event.symbol, price, event.timestamp)?.ready();
        let slow = self.slow.update(&event.symbol, price, event.timestamp)?.ready();
        let (Some(fast), Some(slow)) = (fast, slow) else {
            return Ok(Vec::new());
        };

        let diff = finite("ma_difference", fast.mean - slow.mean)?;
        let side = if diff > 0.0 {
            Side::Above
        } else if diff < 0.0 {
            Side::Below
        } else {
            return Ok(Vec::new());
        };

        let previous = self.sides.insert(event.symbol.clone(), side);
        let reason = match (previous, side) {
            (Some(Side::Below), Side::Above) => ReasonCode::BullishCrossover,
            (Some(Side::Above), Side::Below) => ReasonCode::BearishCrossover,
            _ => return Ok(Vec::new()),
        };
        if !self.gate.try_fire(event) {
            return Ok(Vec::new());
        }

        let separation_pct = if slow.mean > 0.0 {
            diff.abs() / slow.mean * 100.0
        } else {
            0.0
        };
        let strength = (separation_pct / self.config.full_score_separation_pct).min(1.0);
        let score = 50.0 + 50.0 * strength;

        let candidate = CandidateSignal::new(
            ChannelId::Crossover,
            &event.symbol,
            event.timestamp,
            score,
            reason,
        )?
        .with_detail("fast_ma", round4(fast.mean))
        .with_detail("slow_ma", round4(slow.mean))
        .with_detail("separation_pct", round4(separation_pct));

        Ok(vec![candidate])
    }

    fn reset(&mut self, symbol: &str) {
        self.fast.reset(symbol);
        self.slow.reset(symbol);
        self.sides.remove(symbol);
        self.gate.reset(symbol);
    }
}
