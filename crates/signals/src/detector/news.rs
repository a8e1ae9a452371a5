//! News correlation.
//!
//! Headlines are matched against a keyword list and an exclusion list, then
//! classified by age:
//! - breaking (age within `breaking_max_age_mins`): a `breaking_news`
//!   candidate once confirmed. Confirmation is immediate unless
//!   `require_volume_confirmation` is set, in which case the item waits for
//!   a volume burst inside the correlation window.
//! - general (age within `general_max_age_hours`): a low-score `news`
//!   candidate immediately, and a `news_correlated` candidate if a volume
//!   burst follows inside the correlation window.
//!
//! Older headlines are ignored. A repeated headline for the same symbol is
//! ignored while the original is still tracked. Tracked headlines of every
//! symbol are swept against the newest event time, so symbols that stop
//! trading do not keep state.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use signalscan_core::{
    CandidateSignal, ChannelId, DetectorError, EventPayload, NewsConfig, NormalizedEvent,
    ReasonCode,
};

use super::{finite, round4, Detector, TriggerGate};
use crate::window::{RollingWindowStore, WindowSpec};

/// Event-time spacing between full sweeps of tracked headlines.
const SWEEP_INTERVAL_SECS: i64 = 60;

/// Age class of a matched headline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewsAge {
    Breaking,
    General,
}

#[derive(Debug, Clone)]
struct PendingNews {
    headline: String,
    matched: Vec<String>,
    age: NewsAge,
    observed_at: DateTime<Utc>,
}

pub struct NewsDetector {
    config: NewsConfig,
    keywords: Vec<String>,
    excluded: Vec<String>,
    volumes: RollingWindowStore,
    pending: HashMap<String, Vec<PendingNews>>,
    seen: HashMap<String, HashMap<String, DateTime<Utc>>>,
    watermark: Option<DateTime<Utc>>,
    last_sweep: Option<DateTime<Utc>>,
    gate: TriggerGate,
}

impl NewsDetector {
    #[must_use]
    pub fn new(config: NewsConfig) -> Self {
        let lower = |list: &[String]| list.iter().map(|k| k.to_lowercase()).collect::<Vec<_>>();
        Self {
            keywords: lower(&config.keywords),
            excluded: lower(&config.exclude_keywords),
            volumes: RollingWindowStore::new(
                WindowSpec::Count(config.volume_window),
                config.volume_min_samples,
            ),
            pending: HashMap::new(),
            seen: HashMap::new(),
            watermark: None,
            last_sweep: None,
            gate: TriggerGate::new(&config.common),
            config,
        }
    }

    /// Returns the matched keywords, or `None` if excluded or unmatched.
    #[must_use]
    pub fn match_headline(&self, headline: &str) -> Option<Vec<String>> {
        let text = headline.to_lowercase();
        if self.excluded.iter().any(|x| text.contains(x.as_str())) {
            return None;
        }
        let matched: Vec<String> = self
            .keywords
            .iter()
            .filter(|k| text.contains(k.as_str()))
            .cloned()
            .collect();
        (!matched.is_empty()).then_some(matched)
    }

    /// Classifies a headline's age at observation time.
    #[must_use]
    pub fn classify_age(&self, published_at: DateTime<Utc>, observed_at: DateTime<Utc>) -> Option<NewsAge> {
        let age = observed_at - published_at;
        let breaking = Duration::minutes(i64::try_from(self.config.breaking_max_age_mins).unwrap_or(i64::MAX / 60_000));
        let general = Duration::hours(i64::try_from(self.config.general_max_age_hours).unwrap_or(i64::MAX / 3_600_000));
        if age < Duration::zero() || age <= breaking {
            Some(NewsAge::Breaking)
        } else if age <= general {
            Some(NewsAge::General)
        } else {
            None
        }
    }

    fn correlation_window(&self) -> Duration {
        Duration::seconds(i64::try_from(self.config.correlation_window_secs).unwrap_or(i64::MAX / 1_000))
    }

    /// How long a headline blocks repeats of itself.
    fn seen_horizon(&self) -> Duration {
        self.correlation_window().max(Duration::hours(
            i64::try_from(self.config.general_max_age_hours).unwrap_or(48),
        ))
    }

    /// Drops expired pending and seen headlines for all symbols.
    fn sweep(&mut self, at: DateTime<Utc>) {
        let now = self.watermark.map_or(at, |w| w.max(at));
        self.watermark = Some(now);
        if self
            .last_sweep
            .is_some_and(|last| now - last < Duration::seconds(SWEEP_INTERVAL_SECS))
        {
            return;
        }
        self.last_sweep = Some(now);

        let window = self.correlation_window();
        let horizon = self.seen_horizon();
        self.pending.retain(|_, items| {
            items.retain(|item| now - item.observed_at <= window);
            !items.is_empty()
        });
        self.seen.retain(|_, headlines| {
            headlines.retain(|_, seen_at| now - *seen_at <= horizon);
            !headlines.is_empty()
        });
    }

    fn candidate(
        &self,
        event: &NormalizedEvent,
        reason: ReasonCode,
        score: f64,
        item: &PendingNews,
    ) -> Result<CandidateSignal, DetectorError> {
        Ok(CandidateSignal::new(ChannelId::News, &event.symbol, event.timestamp, score, reason)?
            .with_detail("headline", item.headline.clone())
            .with_detail("keywords", item.matched.clone())
            .with_detail(
                "age_class",
                match item.age {
                    NewsAge::Breaking => "breaking",
                    NewsAge::General => "general",
                },
            ))
    }

    fn on_headline(
        &mut self,
        event: &NormalizedEvent,
        headline: &str,
        published_at: DateTime<Utc>,
    ) -> Result<Vec<CandidateSignal>, DetectorError> {
        let Some(matched) = self.match_headline(headline) else {
            return Ok(Vec::new());
        };
        let Some(age) = self.classify_age(published_at, event.timestamp) else {
            return Ok(Vec::new());
        };

        let key = headline.trim().to_lowercase();
        let horizon = self.seen_horizon();
        let seen = self.seen.entry(event.symbol.clone()).or_default();
        seen.retain(|_, at| event.timestamp - *at <= horizon);
        if seen.contains_key(&key) {
            return Ok(Vec::new());
        }
        seen.insert(key, event.timestamp);

        let item = PendingNews {
            headline: headline.to_string(),
            matched,
            age,
            observed_at: event.timestamp,
        };
        let volume_confirmed = self.volume_burst_now(&event.symbol);

        match age {
            NewsAge::Breaking if !self.config.require_volume_confirmation || volume_confirmed => {
                if !self.gate.try_fire(event) {
                    return Ok(Vec::new());
                }
                let c = self.candidate(event, ReasonCode::BreakingNews, self.config.breaking_score, &item)?;
                Ok(vec![c.with_detail("volume_confirmed", volume_confirmed)])
            }
            NewsAge::Breaking => {
                self.pending.entry(event.symbol.clone()).or_default().push(item);
                Ok(Vec::new())
            }
            NewsAge::General => {
                let fire = self.gate.try_fire(event);
                let out = if fire {
                    vec![self.candidate(event, ReasonCode::News, self.config.general_score, &item)?]
                } else {
                    Vec::new()
                };
                self.pending.entry(event.symbol.clone()).or_default().push(item);
                Ok(out)
            }
        }
    }

    /// True if the latest volume sample for the symbol was a burst.
    fn volume_burst_now(&self, symbol: &str) -> bool {
        self.volumes
            .read(symbol)
            .ready()
            .is_some_and(|s| s.mean > f64::EPSILON && s.last / s.mean >= self.config.volume_confirm_multiplier)
    }

    fn on_volume(&mut self, event: &NormalizedEvent, volume: f64) -> Result<Vec<CandidateSignal>, DetectorError> {
        let baseline = self.volumes.read(&event.symbol).ready();
        self.volumes.update(&event.symbol, volume, event.timestamp)?;

        let window = self.correlation_window();
        let Some(items) = self.pending.get_mut(&event.symbol) else {
            return Ok(Vec::new());
        };
        items.retain(|item| event.timestamp - item.observed_at <= window);
        if items.is_empty() {
            self.pending.remove(&event.symbol);
            return Ok(Vec::new());
        }

        let Some(stats) = baseline else {
            return Ok(Vec::new());
        };
        if stats.mean <= f64::EPSILON {
            return Ok(Vec::new());
        }
        let ratio = finite("news_volume_ratio", volume / stats.mean)?;
        if ratio < self.config.volume_confirm_multiplier {
            return Ok(Vec::new());
        }

        let confirmed = self.pending.remove(&event.symbol).unwrap_or_default();
        let mut out = Vec::with_capacity(confirmed.len());
        for item in &confirmed {
            let (reason, score) = match item.age {
                NewsAge::Breaking => (ReasonCode::BreakingNews, self.config.breaking_score),
                NewsAge::General => (
                    ReasonCode::NewsCorrelated,
                    (self.config.general_score + 10.0 * ratio / self.config.volume_confirm_multiplier)
                        .min(100.0),
                ),
            };
            out.push(
                self.candidate(event, reason, score, item)?
                    .with_detail("volume_confirmed", true)
                    .with_detail("volume_ratio", round4(ratio))
                    .with_detail("news_lag_secs", (event.timestamp - item.observed_at).num_seconds()),
            );
        }
        Ok(out)
    }
}

impl Detector for NewsDetector {
    fn channel(&self) -> ChannelId {
        ChannelId::News
    }

    fn process(&mut self, event: &NormalizedEvent) -> Result<Vec<CandidateSignal>, DetectorError> {
        self.sweep(event.timestamp);
        match &event.payload {
            EventPayload::News {
                headline,
                published_at,
                ..
            } => self.on_headline(event, headline, *published_at),
            EventPayload::Trade { size, .. } => self.on_volume(event, *size),
            EventPayload::Bar { volume, .. } => self.on_volume(event, *volume),
            EventPayload::Halt { .. } => Ok(Vec::new()),
        }
    }

    fn reset(&mut self, symbol: &str) {
        self.volumes.reset(symbol);
        self.pending.remove(symbol);
        self.seen.remove(symbol);
        self.gate.reset(symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::test_support::*;

    fn detector(require_volume: bool) -> NewsDetector {
        NewsDetector::new(NewsConfig {
            keywords: vec!["FDA approves".to_string(), "merger agreement".to_string()],
            exclude_keywords: vec!["sponsored".to_string()],
            require_volume_confirmation: require_volume,
            volume_min_samples: 3,
            ..NewsConfig::default()
        })
    }

    fn news(symbol: &str, secs: i64, headline: &str, age_mins: i64) -> NormalizedEvent {
        NormalizedEvent::news(symbol, at(secs), headline, at(secs) - Duration::minutes(age_mins))
    }

    // ============================================
    // Classification
    // ============================================

    #[test]
    fn keyword_matching_is_case_insensitive_and_honors_exclusions() {
        let d = detector(false);
        assert_eq!(
            d.match_headline("XYZ: fda APPROVES new drug"),
            Some(vec!["fda approves".to_string()])
        );
        assert!(d.match_headline("Sponsored: FDA approves everything").is_none());
        assert!(d.match_headline("Quarterly report filed").is_none());
    }

    #[test]
    fn age_classes() {
        let d = detector(false);
        let now = at(0);
        assert_eq!(d.classify_age(now - Duration::minutes(10), now), Some(NewsAge::Breaking));
        assert_eq!(d.classify_age(now - Duration::hours(5), now), Some(NewsAge::General));
        assert_eq!(d.classify_age(now - Duration::hours(72), now), None);
    }

    // ============================================
    // Candidates
    // ============================================

    #[test]
    fn breaking_news_fires_immediately_without_volume_requirement() {
        let mut d = detector(false);
        let out = d.process(&news("XYZ", 0, "FDA approves XYZ-101", 5)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].reason, ReasonCode::BreakingNews);
        assert!(out[0].is_priority_exempt());
    }

    #[test]
    fn repeated_headline_is_ignored() {
        let mut d = detector(false);
        assert_eq!(d.process(&news("XYZ", 0, "FDA approves XYZ-101", 5)).unwrap().len(), 1);
        assert!(d.process(&news("XYZ", 30, "FDA approves XYZ-101", 6)).unwrap().is_empty());
        assert_eq!(d.process(&news("ABC", 30, "FDA approves XYZ-101", 6)).unwrap().len(), 1);
    }

    #[test]
    fn breaking_news_waits_for_volume_confirmation() {
        let mut d = detector(true);
        for i in 0..3 {
            d.process(&trade("XYZ", i, 5.0, 1_000.0)).unwrap();
        }
        assert!(d.process(&news("XYZ", 10, "Definitive merger agreement signed", 1)).unwrap().is_empty());
        assert!(d.process(&trade("XYZ", 11, 5.0, 1_100.0)).unwrap().is_empty());

        let out = d.process(&trade("XYZ", 12, 5.2, 5_000.0)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].reason, ReasonCode::BreakingNews);
        assert_eq!(out[0].raw_details["volume_confirmed"], true);

        // confirmed once only
        assert!(d.process(&trade("XYZ", 13, 5.3, 9_000.0)).unwrap().is_empty());
    }

    #[test]
    fn general_news_fires_then_correlates_with_volume() {
        let mut d = detector(false);
        for i in 0..3 {
            d.process(&trade("XYZ", i, 5.0, 1_000.0)).unwrap();
        }
        let first = d.process(&news("XYZ", 10, "Merger agreement talks reported", 180)).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].reason, ReasonCode::News);

        let burst = d.process(&trade("XYZ", 40, 5.5, 4_000.0)).unwrap();
        assert_eq!(burst.len(), 1);
        assert_eq!(burst[0].reason, ReasonCode::NewsCorrelated);
        assert!(burst[0].channel_score > first[0].channel_score);
    }

    #[test]
    fn pending_news_expires_after_correlation_window() {
        let mut d = NewsDetector::new(NewsConfig {
            keywords: vec!["merger agreement".to_string()],
            correlation_window_secs: 60,
            require_volume_confirmation: true,
            volume_min_samples: 3,
            ..NewsConfig::default()
        });
        for i in 0..3 {
            d.process(&trade("XYZ", i, 5.0, 1_000.0)).unwrap();
        }
        d.process(&news("XYZ", 10, "Merger agreement signed", 1)).unwrap();
        assert!(d.process(&trade("XYZ", 200, 5.0, 9_000.0)).unwrap().is_empty());
    }

    #[test]
    fn quiet_symbols_are_swept_by_other_traffic() {
        let mut d = NewsDetector::new(NewsConfig {
            keywords: vec!["merger agreement".to_string()],
            correlation_window_secs: 60,
            general_max_age_hours: 1,
            ..NewsConfig::default()
        });
        assert_eq!(d.process(&news("QQQ", 0, "Merger agreement talks", 40)).unwrap().len(), 1);
        assert!(d.pending.contains_key("QQQ"));
        assert!(d.seen.contains_key("QQQ"));

        // QQQ never trades again; other symbols keep the clock moving
        for secs in (60..=3_720).step_by(60) {
            d.process(&trade("XYZ", secs, 5.0, 1_000.0)).unwrap();
        }
        assert!(d.pending.is_empty());
        assert!(d.seen.is_empty());
    }
}
