//! Final scoring and priority classification.
//!
//! Everything here is a pure function of a resolved bucket, an optional
//! enrichment and the scoring config, so replaying the same buckets always
//! yields the same decisions.

use signalscan_core::{
    DecisionError, Enrichment, Priority, ReasonCode, ScoreCombination, ScoringConfig,
};

use crate::dedup::{Contribution, ResolvedBucket};

/// Scoring outcome for one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Combined channel score before enrichment.
    pub base_score: f64,
    /// Enrichment boost actually applied (after clamping).
    pub boost: f64,
    /// Final score in [0, 100].
    pub final_score: f64,
    pub priority: Priority,
    /// Whether the bucket should be emitted (subject to suppression).
    pub emit: bool,
}

/// Combines weighted contribution scores.
///
/// # Errors
/// Returns an error if there are no contributions or a weighted score is not
/// finite.
pub fn combine(contributions: &[Contribution], combination: ScoreCombination) -> Result<f64, DecisionError> {
    let mut weighted = Vec::with_capacity(contributions.len());
    for c in contributions {
        let value = c.weighted_score();
        if !value.is_finite() {
            return Err(DecisionError::NonFiniteScore {
                channel: c.channel,
                value,
            });
        }
        weighted.push(value.max(0.0));
    }

    let combined = match combination {
        ScoreCombination::WeightedSum => weighted.iter().sum::<f64>(),
        ScoreCombination::Max => weighted.iter().copied().fold(0.0, f64::max),
        ScoreCombination::ProbabilisticOr => {
            let miss = weighted
                .iter()
                .map(|w| 1.0 - (w / 100.0).clamp(0.0, 1.0))
                .product::<f64>();
            100.0 * (1.0 - miss)
        }
    };
    Ok(combined.clamp(0.0, 100.0))
}

/// Maps a final score and the bucket's reasons to a priority.
#[must_use]
pub fn classify(score: f64, reasons: impl IntoIterator<Item = ReasonCode>, config: &ScoringConfig) -> Priority {
    let mut halt = false;
    let mut breaking = false;
    for reason in reasons {
        halt |= reason.is_halt_class();
        breaking |= reason == ReasonCode::BreakingNews;
    }

    if halt {
        Priority::Critical
    } else if breaking || score >= config.high_cutoff {
        Priority::High
    } else if score >= config.medium_cutoff {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// Scores a resolved bucket.
///
/// # Errors
/// Returns a [`DecisionError`] for empty buckets or non-finite scores.
pub fn decide(
    bucket: &ResolvedBucket,
    enrichment: Option<&Enrichment>,
    config: &ScoringConfig,
) -> Result<Decision, DecisionError> {
    if bucket.contributions.is_empty() {
        return Err(DecisionError::EmptyBucket {
            symbol: bucket.symbol.clone(),
        });
    }

    let base_score = combine(&bucket.contributions, config.combination)?;
    let boost = enrichment
        .map(|e| e.score_boost)
        .filter(|b| b.is_finite())
        .map_or(0.0, |b| b.clamp(-config.max_enrichment_boost, config.max_enrichment_boost));
    let final_score = (base_score + boost).clamp(0.0, 100.0);

    let priority = classify(final_score, bucket.reasons.iter().copied(), config);
    let emit = final_score >= config.alert_threshold || priority >= Priority::High;

    Ok(Decision {
        base_score,
        boost,
        final_score,
        priority,
        emit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupKey;
    use crate::detector::test_support::at;
    use signalscan_core::{ChannelId, RawDetails};
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn contribution(channel: ChannelId, reason: ReasonCode, score: f64, weight: f64) -> Contribution {
        Contribution {
            channel,
            reason,
            channel_score: score,
            normalized_score: score,
            weight,
            candidate_id: Uuid::new_v4(),
            timestamp: at(0),
            raw_details: RawDetails::new(),
        }
    }

    fn bucket(contributions: Vec<Contribution>) -> ResolvedBucket {
        let reasons: BTreeSet<ReasonCode> = contributions.iter().map(|c| c.reason).collect();
        let first = contributions.first().map_or(ChannelId::PriceSpike, |c| c.channel);
        ResolvedBucket {
            key: DedupKey::derive("XYZ", ReasonCode::PriceSpikeUp, at(0), 3_000),
            symbol: "XYZ".to_string(),
            opened_at: at(0),
            last_seen: at(0),
            resolved_at: at(3),
            reason_channel: first,
            candidate_count: contributions.len(),
            exempt: reasons.iter().any(|r| r.is_priority_exempt()),
            contributions,
            reasons,
            forced: false,
        }
    }

    // ============================================
    // Combination
    // ============================================

    #[test]
    fn weighted_sum_is_clamped() {
        let cs = vec![
            contribution(ChannelId::PriceSpike, ReasonCode::PriceSpikeUp, 60.0, 1.0),
            contribution(ChannelId::VolumeSpike, ReasonCode::VolumeSpike, 90.0, 1.0),
        ];
        assert!((combine(&cs, ScoreCombination::WeightedSum).unwrap() - 100.0).abs() < 1e-9);
        assert!((combine(&cs, ScoreCombination::Max).unwrap() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn probabilistic_or_combines_independent_evidence() {
        let cs = vec![
            contribution(ChannelId::PriceSpike, ReasonCode::PriceSpikeUp, 50.0, 1.0),
            contribution(ChannelId::VolumeSpike, ReasonCode::VolumeSpike, 50.0, 1.0),
        ];
        let score = combine(&cs, ScoreCombination::ProbabilisticOr).unwrap();
        assert!((score - 75.0).abs() < 1e-9);
    }

    #[test]
    fn weights_scale_contributions() {
        let cs = vec![contribution(ChannelId::Momentum, ReasonCode::MomentumUp, 80.0, 0.5)];
        assert!((combine(&cs, ScoreCombination::WeightedSum).unwrap() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn non_finite_score_is_a_decision_error() {
        let cs = vec![contribution(ChannelId::Momentum, ReasonCode::MomentumUp, f64::NAN, 1.0)];
        assert!(matches!(
            combine(&cs, ScoreCombination::WeightedSum),
            Err(DecisionError::NonFiniteScore {
                channel: ChannelId::Momentum,
                ..
            })
        ));
    }

    // ============================================
    // Decisions
    // ============================================

    #[test]
    fn merged_price_and_volume_is_high_priority() {
        let b = bucket(vec![
            contribution(ChannelId::PriceSpike, ReasonCode::PriceSpikeUp, 60.0, 1.0),
            contribution(ChannelId::VolumeSpike, ReasonCode::VolumeSpike, 90.0, 1.0),
        ]);
        let d = decide(&b, None, &ScoringConfig::default()).unwrap();
        assert_eq!(d.priority, Priority::High);
        assert!(d.emit);
    }

    #[test]
    fn low_score_is_audit_only() {
        let b = bucket(vec![contribution(ChannelId::Crossover, ReasonCode::BullishCrossover, 30.0, 1.0)]);
        let d = decide(&b, None, &ScoringConfig::default()).unwrap();
        assert_eq!(d.priority, Priority::Low);
        assert!(!d.emit);
    }

    #[test]
    fn halt_is_always_critical() {
        let mut halt = contribution(ChannelId::Halt, ReasonCode::Halt, 100.0, 0.0);
        halt.normalized_score = 0.0;
        let d = decide(&bucket(vec![halt]), None, &ScoringConfig::default()).unwrap();
        assert_eq!(d.priority, Priority::Critical);
        assert!(d.emit);
    }

    #[test]
    fn breaking_news_is_at_least_high() {
        let b = bucket(vec![contribution(ChannelId::News, ReasonCode::BreakingNews, 20.0, 1.0)]);
        let d = decide(&b, None, &ScoringConfig::default()).unwrap();
        assert_eq!(d.priority, Priority::High);
        assert!(d.emit);
    }

    #[test]
    fn enrichment_boost_is_bounded() {
        let b = bucket(vec![contribution(ChannelId::MeanReversion, ReasonCode::Oversold, 55.0, 1.0)]);
        let enrichment = Enrichment {
            context: vec!["low float".to_string()],
            score_boost: 50.0,
        };
        let d = decide(&b, Some(&enrichment), &ScoringConfig::default()).unwrap();
        assert!((d.boost - 10.0).abs() < 1e-9);
        assert!((d.final_score - 65.0).abs() < 1e-9);
        assert!(d.emit);

        let penalty = Enrichment {
            context: Vec::new(),
            score_boost: -50.0,
        };
        let d = decide(&b, Some(&penalty), &ScoringConfig::default()).unwrap();
        assert!((d.final_score - 45.0).abs() < 1e-9);
        assert_eq!(d.priority, Priority::Medium);
        assert!(!d.emit);
    }

    #[test]
    fn empty_bucket_is_rejected() {
        let b = bucket(Vec::new());
        assert!(matches!(
            decide(&b, None, &ScoringConfig::default()),
            Err(DecisionError::EmptyBucket { .. })
        ));
    }
}
