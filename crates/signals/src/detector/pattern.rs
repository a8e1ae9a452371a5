//! Chart patterns.
//!
//! Patterns sharing this channel:
//! - new high: price clears the highest price of the breakout lookback by
//!   at least `breakout_min_pct`.
//! - squeeze release: the Bollinger band sat inside the Keltner channel for at
//!   least `min_coil_bars` consecutive bars and then expanded outside it.
//! - gap: the first move of a UTC day at least `gap_min_pct` away from the
//!   previous day's last price. Fires once per symbol per day.
//! - high of day: price breaks above the day's high after trading below it.
//!   A run of consecutive new highs fires once.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use signalscan_core::{
    CandidateSignal, ChannelId, DetectorError, EventPayload, NormalizedEvent, PatternConfig,
    ReasonCode,
};

use super::{finite, round4, threshold_score, Detector, TriggerGate};
use crate::window::{AtrWindow, RollingWindowStore, WindowSpec};

/// Per-symbol levels for the current UTC day.
#[derive(Debug, Clone)]
struct DayLevels {
    day: NaiveDate,
    prev_close: Option<f64>,
    last: f64,
    high: f64,
    samples: usize,
    gapped: bool,
    at_high: bool,
}

impl DayLevels {
    fn open(day: NaiveDate, prev_close: Option<f64>) -> Self {
        Self {
            day,
            prev_close,
            last: 0.0,
            high: f64::MIN,
            samples: 0,
            gapped: false,
            at_high: false,
        }
    }
}

pub struct PatternDetector {
    config: PatternConfig,
    highs: RollingWindowStore,
    closes: RollingWindowStore,
    ranges: HashMap<String, AtrWindow>,
    coil: HashMap<String, u32>,
    days: HashMap<String, DayLevels>,
    gate: TriggerGate,
}

impl PatternDetector {
    #[must_use]
    pub fn new(config: PatternConfig) -> Self {
        let lookback = Duration::seconds(
            i64::try_from(config.breakout_lookback_secs).unwrap_or(i64::MAX / 1_000),
        );
        Self {
            highs: RollingWindowStore::new(WindowSpec::Duration(lookback), config.breakout_min_samples),
            closes: RollingWindowStore::new(
                WindowSpec::Count(config.squeeze_length),
                config.squeeze_length,
            ),
            ranges: HashMap::new(),
            coil: HashMap::new(),
            days: HashMap::new(),
            gate: TriggerGate::new(&config.common),
            config,
        }
    }

    fn new_high(
        &self,
        event: &NormalizedEvent,
        high: f64,
        prior_max: f64,
    ) -> Result<Option<CandidateSignal>, DetectorError> {
        if prior_max <= 0.0 {
            return Ok(None);
        }
        let above_pct = finite("breakout_pct", (high - prior_max) / prior_max * 100.0)?;
        if above_pct < self.config.breakout_min_pct {
            return Ok(None);
        }
        let candidate = CandidateSignal::new(
            ChannelId::Pattern,
            &event.symbol,
            event.timestamp,
            threshold_score(above_pct, self.config.breakout_min_pct),
            ReasonCode::NewHigh,
        )?
        .with_detail("pattern", "new_high")
        .with_detail("price", high)
        .with_detail("prior_high", prior_max)
        .with_detail("above_pct", round4(above_pct));
        Ok(Some(candidate))
    }

    /// Updates the symbol's day levels and returns gap and high-of-day
    /// candidates.
    fn day_levels(
        &mut self,
        event: &NormalizedEvent,
        high: f64,
        close: f64,
    ) -> Result<Vec<CandidateSignal>, DetectorError> {
        let config = &self.config;
        let today = event.timestamp.date_naive();
        let levels = self
            .days
            .entry(event.symbol.clone())
            .or_insert_with(|| DayLevels::open(today, None));
        if today < levels.day {
            return Ok(Vec::new());
        }
        if today > levels.day {
            let prev_close = (levels.samples > 0).then_some(levels.last).or(levels.prev_close);
            *levels = DayLevels::open(today, prev_close);
        }

        let mut out = Vec::new();
        if let (false, Some(prev)) = (levels.gapped, levels.prev_close) {
            if prev > 0.0 {
                let gap_pct = finite("gap_pct", (close - prev) / prev * 100.0)?;
                if gap_pct.abs() >= config.gap_min_pct {
                    levels.gapped = true;
                    let reason = if gap_pct > 0.0 {
                        ReasonCode::GapUp
                    } else {
                        ReasonCode::GapDown
                    };
                    out.push(
                        CandidateSignal::new(
                            ChannelId::Pattern,
                            &event.symbol,
                            event.timestamp,
                            threshold_score(gap_pct, config.gap_min_pct),
                            reason,
                        )?
                        .with_detail("pattern", "gap")
                        .with_detail("price", close)
                        .with_detail("prev_close", prev)
                        .with_detail("gap_pct", round4(gap_pct)),
                    );
                }
            }
        }

        let breaks = levels.samples >= config.hod_min_samples && high > levels.high;
        if breaks && !levels.at_high && levels.high > 0.0 {
            let above_pct = finite("hod_pct", (high - levels.high) / levels.high * 100.0)?;
            out.push(
                CandidateSignal::new(
                    ChannelId::Pattern,
                    &event.symbol,
                    event.timestamp,
                    50.0 + threshold_score(above_pct, config.breakout_min_pct) / 2.0,
                    ReasonCode::HighOfDay,
                )?
                .with_detail("pattern", "high_of_day")
                .with_detail("price", high)
                .with_detail("prior_day_high", levels.high)
                .with_detail("day_samples", levels.samples),
            );
        }
        levels.at_high = breaks;
        levels.high = levels.high.max(high);
        levels.last = close;
        levels.samples += 1;
        Ok(out)
    }

    /// Updates squeeze state and returns the coil length if it just released.
    fn squeeze_release(
        &mut self,
        event: &NormalizedEvent,
        high: f64,
        low: f64,
        close: f64,
    ) -> Result<Option<(u32, f64, f64)>, DetectorError> {
        let closes = self.closes.update(&event.symbol, close, event.timestamp)?.ready();
        let length = self.config.squeeze_length;
        let atr = self
            .ranges
            .entry(event.symbol.clone())
            .or_insert_with(|| AtrWindow::new(length, length))
            .update(event.timestamp, high, low, close)?
            .ready();

        let (Some(closes), Some(atr)) = (closes, atr) else {
            return Ok(None);
        };

        let bb_width = finite("bb_width", self.config.bb_mult * closes.stddev)?;
        let kc_width = finite("kc_width", self.config.kc_mult * atr.mean)?;
        let coil = self.coil.entry(event.symbol.clone()).or_insert(0);

        if bb_width < kc_width {
            *coil = coil.saturating_add(1);
            return Ok(None);
        }
        let bars = std::mem::take(coil);
        if bars >= self.config.min_coil_bars {
            Ok(Some((bars, closes.mean, bb_width)))
        } else {
            Ok(None)
        }
    }
}

impl Detector for PatternDetector {
    fn channel(&self) -> ChannelId {
        ChannelId::Pattern
    }

    fn process(&mut self, event: &NormalizedEvent) -> Result<Vec<CandidateSignal>, DetectorError> {
        let (high, low, close) = match event.payload {
            EventPayload::Bar {
                high, low, close, ..
            } => (high, low, close),
            EventPayload::Trade { price, .. } => (price, price, price),
            _ => return Ok(Vec::new()),
        };

        let prior = self.highs.read(&event.symbol).ready();
        self.highs.update(&event.symbol, high, event.timestamp)?;
        let released = self.squeeze_release(event, high, low, close)?;

        let mut out = self.day_levels(event, high, close)?;
        if let Some(prior) = prior {
            if let Some(candidate) = self.new_high(event, high, prior.max)? {
                out.push(candidate);
            }
        }
        if let Some((bars, mean, bb_width)) = released {
            let direction = if close >= mean { "bullish" } else { "bearish" };
            let extra = f64::from(bars - self.config.min_coil_bars);
            out.push(
                CandidateSignal::new(
                    ChannelId::Pattern,
                    &event.symbol,
                    event.timestamp,
                    50.0 + 5.0 * extra,
                    ReasonCode::SqueezeFired,
                )?
                .with_detail("pattern", "squeeze")
                .with_detail("coil_bars", bars)
                .with_detail("direction", direction)
                .with_detail("bb_width", round4(bb_width)),
            );
        }

        if out.is_empty() || !self.gate.try_fire(event) {
            return Ok(Vec::new());
        }
        Ok(out)
    }

    fn reset(&mut self, symbol: &str) {
        self.highs.reset(symbol);
        self.closes.reset(symbol);
        self.ranges.remove(symbol);
        self.coil.remove(symbol);
        self.days.remove(symbol);
        self.gate.reset(symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::test_support::*;

    #[test]
    fn new_high_after_lookback_is_warm() {
        let mut d = PatternDetector::new(PatternConfig {
            breakout_lookback_secs: 600,
            breakout_min_samples: 5,
            breakout_min_pct: 0.5,
            ..PatternConfig::default()
        });
        for i in 0..5 {
            assert!(d.process(&trade("XYZ", i * 10, 10.0, 1.0)).unwrap().is_empty());
        }
        let out = d.process(&trade("XYZ", 60, 10.2, 1.0)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].reason, ReasonCode::NewHigh);
        assert!((out[0].channel_score - 100.0).abs() < 1e-6);
    }

    #[test]
    fn squeeze_release_after_coil() {
        let mut d = PatternDetector::new(PatternConfig {
            breakout_min_pct: 50.0,
            squeeze_length: 5,
            bb_mult: 2.0,
            kc_mult: 1.5,
            min_coil_bars: 3,
            ..PatternConfig::default()
        });

        // Alternating closes with wide bar ranges keep the bands inside the channel.
        let mut out = Vec::new();
        for i in 0..10 {
            let close = if i % 2 == 0 { 10.0 } else { 10.1 };
            out.extend(d.process(&bar("XYZ", i * 60, close + 1.0, close - 1.0, close, 100.0)).unwrap());
        }
        assert!(out.is_empty());

        // Narrow bars trending hard expand the bands out of the channel.
        for (n, i) in (10..16).enumerate() {
            let close = 10.0 + 1.5 * (n as f64 + 1.0);
            out.extend(d.process(&bar("XYZ", i * 60, close, close, close, 100.0)).unwrap());
        }
        let squeeze: Vec<_> = out.iter().filter(|c| c.reason == ReasonCode::SqueezeFired).collect();
        assert_eq!(squeeze.len(), 1);
        assert_eq!(squeeze[0].raw_details["direction"], "bullish");
    }

    // ============================================
    // Day levels
    // ============================================

    /// Seconds from `at(0)` to the next UTC midnight.
    const NEXT_DAY: i64 = 35_200;

    fn day_detector() -> PatternDetector {
        PatternDetector::new(PatternConfig {
            breakout_min_pct: 50.0,
            gap_min_pct: 10.0,
            hod_min_samples: 3,
            ..PatternConfig::default()
        })
    }

    fn reasons(out: &[CandidateSignal]) -> Vec<ReasonCode> {
        out.iter().map(|c| c.reason).collect()
    }

    #[test]
    fn gap_up_fires_once_on_the_next_day() {
        let mut d = day_detector();
        for i in 0..3 {
            d.process(&trade("XYZ", i, 4.0, 1.0)).unwrap();
        }
        d.process(&trade("XYZ", 3, 5.0, 1.0)).unwrap();

        let out = d.process(&trade("XYZ", NEXT_DAY + 60, 5.6, 1.0)).unwrap();
        assert_eq!(reasons(&out), vec![ReasonCode::GapUp]);
        assert_eq!(out[0].raw_details["prev_close"], 5.0);
        assert!((out[0].channel_score - 60.0).abs() < 1e-6);

        assert!(d.process(&trade("XYZ", NEXT_DAY + 61, 5.7, 1.0)).unwrap().is_empty());
    }

    #[test]
    fn small_overnight_move_is_not_a_gap() {
        let mut d = day_detector();
        d.process(&trade("XYZ", 0, 5.0, 1.0)).unwrap();
        let out = d.process(&trade("XYZ", NEXT_DAY + 60, 4.8, 1.0)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn high_of_day_break_fires_once_per_run() {
        let mut d = day_detector();
        let path = [5.0, 5.2, 5.1, 5.3, 5.4, 5.2, 5.5];
        let mut out = Vec::new();
        for (i, price) in path.iter().enumerate() {
            out.extend(d.process(&trade("XYZ", i as i64, *price, 1.0)).unwrap());
        }
        // 5.3 starts a run (5.4 extends it), 5.5 breaks again after the dip
        let hod: Vec<_> = out.iter().filter(|c| c.reason == ReasonCode::HighOfDay).collect();
        assert_eq!(hod.len(), 2);
        assert_eq!(hod[0].raw_details["prior_day_high"], 5.2);
        assert_eq!(hod[1].raw_details["prior_day_high"], 5.4);
    }
}
