//! Halt and resume notices. Stateless; every qualifying event fires.

use signalscan_core::{
    CandidateSignal, ChannelId, DetectorError, EventPayload, HaltConfig, HaltStatus,
    NormalizedEvent, ReasonCode,
};

use super::Detector;

pub struct HaltDetector {
    config: HaltConfig,
}

impl HaltDetector {
    #[must_use]
    pub fn new(config: HaltConfig) -> Self {
        Self { config }
    }
}

impl Detector for HaltDetector {
    fn channel(&self) -> ChannelId {
        ChannelId::Halt
    }

    fn process(&mut self, event: &NormalizedEvent) -> Result<Vec<CandidateSignal>, DetectorError> {
        let EventPayload::Halt {
            status,
            reason_code,
        } = &event.payload
        else {
            return Ok(Vec::new());
        };
        if !self.config.common.allows_session(event.session) {
            return Ok(Vec::new());
        }

        let reason = match status {
            HaltStatus::Halted => ReasonCode::Halt,
            HaltStatus::Resumed => ReasonCode::Resume,
        };
        let mut candidate =
            CandidateSignal::new(ChannelId::Halt, &event.symbol, event.timestamp, 100.0, reason)?;
        if !reason_code.is_empty() {
            candidate = candidate.with_detail("reason_code", reason_code.clone());
        }
        Ok(vec![candidate])
    }

    fn reset(&mut self, _symbol: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::test_support::*;

    #[test]
    fn halt_and_resume_fire_with_full_score() {
        let mut d = HaltDetector::new(HaltConfig::default());
        let halted = d
            .process(&NormalizedEvent::halt("ABC", at(0), HaltStatus::Halted, "LUDP"))
            .unwrap();
        assert_eq!(halted.len(), 1);
        assert_eq!(halted[0].reason, ReasonCode::Halt);
        assert!((halted[0].channel_score - 100.0).abs() < f64::EPSILON);
        assert_eq!(halted[0].raw_details["reason_code"], "LUDP");

        let resumed = d
            .process(&NormalizedEvent::halt("ABC", at(5), HaltStatus::Resumed, ""))
            .unwrap();
        assert_eq!(resumed[0].reason, ReasonCode::Resume);
        assert!(!resumed[0].raw_details.contains_key("reason_code"));
    }

    #[test]
    fn ignores_market_data() {
        let mut d = HaltDetector::new(HaltConfig::default());
        assert!(d.process(&trade("ABC", 0, 10.0, 1.0)).unwrap().is_empty());
    }
}
