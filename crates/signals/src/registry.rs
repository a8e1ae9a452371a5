//! Detector registry keyed by channel.
//!
//! The registry provides a flat, ordered set of detectors (one per channel)
//! and runs all of them over an event, isolating failures so one faulty
//! detector never prevents the others from producing candidates.

use std::collections::BTreeMap;

use signalscan_core::{CandidateSignal, ChannelId, ChannelsConfig, EngineMetrics, NormalizedEvent};

use crate::detector::{build_detector, guarded_process, Detector};

/// Registry of detectors, iterated in channel order.
pub struct DetectorRegistry {
    detectors: BTreeMap<ChannelId, Box<dyn Detector>>,
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            detectors: BTreeMap::new(),
        }
    }

    /// Creates a registry with one detector for every channel.
    ///
    /// Disabled channels are registered too; the enable toggle is checked
    /// per event so it can be flipped by a config reload.
    #[must_use]
    pub fn from_config(config: &ChannelsConfig) -> Self {
        let mut registry = Self::new();
        for channel in ChannelId::ALL {
            registry.register(build_detector(channel, config));
        }
        registry
    }

    /// Registers a detector, replacing any detector on the same channel.
    pub fn register(&mut self, detector: Box<dyn Detector>) {
        self.detectors.insert(detector.channel(), detector);
    }

    /// Returns the registered channels in order.
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelId> {
        self.detectors.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Runs every enabled detector over the event.
    ///
    /// Detectors that fail (or panic) are skipped for this event; the fault
    /// is logged and counted.
    pub fn process_all(
        &mut self,
        event: &NormalizedEvent,
        config: &ChannelsConfig,
        metrics: &EngineMetrics,
    ) -> Vec<CandidateSignal> {
        let mut candidates = Vec::new();

        for (channel, detector) in &mut self.detectors {
            if !config.common(*channel).enabled {
                continue;
            }
            match guarded_process(detector.as_mut(), event) {
                Ok(mut out) => candidates.append(&mut out),
                Err(e) => {
                    metrics.record_detector_fault(*channel);
                    tracing::warn!(
                        channel = %channel,
                        symbol = %event.symbol,
                        error = %e,
                        "Detector failed, skipping"
                    );
                }
            }
        }

        candidates
    }

    /// Rebuilds detectors whose settings changed between two configs.
    ///
    /// Rebuilt detectors start cold. Returns the rebuilt channels.
    pub fn reconfigure(&mut self, previous: &ChannelsConfig, next: &ChannelsConfig) -> Vec<ChannelId> {
        let changed: Vec<ChannelId> = self
            .channels()
            .into_iter()
            .filter(|channel| previous.detector_changed(next, *channel))
            .collect();
        for channel in &changed {
            tracing::info!(channel = %channel, "Detector settings changed, rebuilding");
            self.register(build_detector(*channel, next));
        }
        changed
    }
}

impl std::fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorRegistry")
            .field("channels", &self.channels())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::test_support::*;
    use signalscan_core::{DetectorError, HaltStatus, ReasonCode};

    // Mock detector for testing
    struct MockDetector {
        channel: ChannelId,
        should_fail: bool,
        should_panic: bool,
    }

    impl MockDetector {
        fn new(channel: ChannelId) -> Self {
            Self {
                channel,
                should_fail: false,
                should_panic: false,
            }
        }

        fn failing(mut self) -> Self {
            self.should_fail = true;
            self
        }

        fn panicking(mut self) -> Self {
            self.should_panic = true;
            self
        }
    }

    impl Detector for MockDetector {
        fn channel(&self) -> ChannelId {
            self.channel
        }

        fn process(&mut self, event: &NormalizedEvent) -> Result<Vec<CandidateSignal>, DetectorError> {
            if self.should_panic {
                panic!("mock detector panic");
            }
            if self.should_fail {
                return Err(DetectorError::NonFiniteStatistic {
                    name: "mock",
                    value: f64::NAN,
                });
            }
            Ok(vec![CandidateSignal::new(
                self.channel,
                &event.symbol,
                event.timestamp,
                42.0,
                ReasonCode::VolumeSpike,
            )?])
        }

        fn reset(&mut self, _symbol: &str) {}
    }

    // ============================================
    // Registration Tests
    // ============================================

    #[test]
    fn registry_new_is_empty() {
        let registry = DetectorRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn registry_from_config_has_every_channel_in_order() {
        let registry = DetectorRegistry::from_config(&ChannelsConfig::default());
        assert_eq!(registry.channels(), ChannelId::ALL.to_vec());
    }

    #[test]
    fn registry_replaces_detector_on_same_channel() {
        let mut registry = DetectorRegistry::new();
        registry.register(Box::new(MockDetector::new(ChannelId::News)));
        registry.register(Box::new(MockDetector::new(ChannelId::News).failing()));
        assert_eq!(registry.channels(), vec![ChannelId::News]);

        let out = registry.process_all(&trade("XYZ", 0, 10.0, 1.0), &ChannelsConfig::default(), &EngineMetrics::new());
        assert!(out.is_empty());
    }

    // ============================================
    // Processing Tests
    // ============================================

    #[test]
    fn process_all_skips_failing_and_panicking_detectors() {
        let metrics = EngineMetrics::new();
        let mut registry = DetectorRegistry::new();
        registry.register(Box::new(MockDetector::new(ChannelId::PriceSpike)));
        registry.register(Box::new(MockDetector::new(ChannelId::VolumeSpike).failing()));
        registry.register(Box::new(MockDetector::new(ChannelId::Momentum).panicking()));
        registry.register(Box::new(MockDetector::new(ChannelId::Pattern)));

        let out = registry.process_all(&trade("XYZ", 0, 10.0, 1.0), &ChannelsConfig::default(), &metrics);

        let channels: Vec<_> = out.iter().map(|c| c.channel).collect();
        assert_eq!(channels, vec![ChannelId::PriceSpike, ChannelId::Pattern]);
        assert_eq!(metrics.detector_faults(ChannelId::VolumeSpike), 1);
        assert_eq!(metrics.detector_faults(ChannelId::Momentum), 1);
    }

    #[test]
    fn process_all_respects_enable_toggle() {
        let metrics = EngineMetrics::new();
        let mut config = ChannelsConfig::default();
        config.halt.common.enabled = false;

        let mut registry = DetectorRegistry::from_config(&config);
        let halt = NormalizedEvent::halt("ABC", at(0), HaltStatus::Halted, "T1");
        assert!(registry.process_all(&halt, &config, &metrics).is_empty());

        config.halt.common.enabled = true;
        assert_eq!(registry.process_all(&halt, &config, &metrics).len(), 1);
    }

    #[test]
    fn reconfigure_rebuilds_only_changed_channels() {
        let before = ChannelsConfig::default();
        let mut after = before.clone();
        after.momentum.threshold_pct = 9.0;
        after.price_spike.common.weight = 3.0;

        let mut registry = DetectorRegistry::from_config(&before);
        assert_eq!(registry.reconfigure(&before, &after), vec![ChannelId::Momentum]);
    }
}
