//! Decision stage: enrichment, scoring, suppression and audit for one
//! resolved bucket.
//!
//! Every resolved bucket produces exactly one [`DecisionRecord`], which is
//! also handed to the audit sink. Enrichment runs under a timeout and its
//! absence (timeout, error, no enricher) never fails the decision.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use signalscan_core::{
    Alert, AuditRecord, AuditSink, DecisionRecord, Disposition, EngineConfig, EngineMetrics,
    Enricher, Enrichment, RawDetails, SharedConfig,
};
use uuid::Uuid;

use crate::dedup::ResolvedBucket;
use crate::scoring::{self, Decision};
use crate::suppression::SuppressionEngine;

pub struct DecisionStage {
    config: SharedConfig,
    suppression: SuppressionEngine,
    enricher: Option<Arc<dyn Enricher>>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<EngineMetrics>,
}

impl DecisionStage {
    #[must_use]
    pub fn new(
        config: SharedConfig,
        suppression: SuppressionEngine,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            config,
            suppression,
            enricher: None,
            audit,
            metrics,
        }
    }

    #[must_use]
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    #[must_use]
    pub fn suppression(&self) -> &SuppressionEngine {
        &self.suppression
    }

    /// Decides one resolved bucket.
    pub async fn resolve(&self, bucket: ResolvedBucket) -> DecisionRecord {
        let started = Instant::now();
        EngineMetrics::incr(&self.metrics.buckets_resolved);
        let config = Arc::clone(&self.config.borrow());

        let enrichment = if bucket.exempt {
            None
        } else {
            self.enrich(&bucket, &config).await
        };

        let (disposition, alert) = match scoring::decide(&bucket, enrichment.as_ref(), &config.scoring) {
            Err(e) => {
                EngineMetrics::incr(&self.metrics.decision_errors);
                tracing::warn!(symbol = %bucket.symbol, key = %bucket.key, "Decision failed: {}", e);
                (
                    Disposition::DecisionError {
                        error: e.to_string(),
                    },
                    None,
                )
            }
            Ok(decision) => {
                let alert = build_alert(&bucket, &decision, enrichment.as_ref());
                let disposition = self.dispose(&bucket, &decision, &alert, &config);
                (disposition, Some(alert))
            }
        };

        let record = DecisionRecord {
            symbol: bucket.symbol.clone(),
            dedup_key: bucket.key.to_string(),
            channels: bucket.channels(),
            candidate_count: bucket.candidate_count,
            disposition,
            alert,
            recorded_at: bucket.resolved_at,
        };
        self.audit.record(AuditRecord::Decision(record.clone()));
        self.metrics.decision_latency.record(started.elapsed());
        record
    }

    fn dispose(
        &self,
        bucket: &ResolvedBucket,
        decision: &Decision,
        alert: &Alert,
        config: &EngineConfig,
    ) -> Disposition {
        if !decision.emit {
            EngineMetrics::incr(&self.metrics.audit_only);
            tracing::debug!(
                symbol = %alert.symbol,
                score = decision.final_score,
                "Below alert threshold, audit only"
            );
            return Disposition::AuditOnly;
        }

        if let Err(reason) = self.suppression.admit(bucket, alert.timestamp) {
            self.metrics.record_suppression(&reason);
            tracing::debug!(
                symbol = %alert.symbol,
                channel = %bucket.reason_channel,
                "Alert suppressed: {}",
                reason
            );
            return Disposition::Suppressed { reason };
        }

        if config.engine.dry_run {
            EngineMetrics::incr(&self.metrics.alerts_dry_run);
            tracing::info!(
                symbol = %alert.symbol,
                alert_id = %alert.id,
                priority = %alert.priority,
                score = alert.final_score,
                "[dry run] {}",
                alert.summary
            );
            return Disposition::DryRun;
        }

        EngineMetrics::incr(&self.metrics.alerts_emitted);
        tracing::info!(
            symbol = %alert.symbol,
            alert_id = %alert.id,
            priority = %alert.priority,
            score = alert.final_score,
            reason = %alert.reason,
            "Alert emitted"
        );
        Disposition::Emitted
    }

    async fn enrich(&self, bucket: &ResolvedBucket, config: &EngineConfig) -> Option<Enrichment> {
        let enricher = self.enricher.as_ref()?;
        let timeout = config.scoring.enrichment_timeout();
        match tokio::time::timeout(timeout, enricher.enrich(&bucket.symbol, bucket.opened_at)).await {
            Ok(Ok(enrichment)) => enrichment,
            Ok(Err(e)) => {
                EngineMetrics::incr(&self.metrics.enrichment_failures);
                tracing::debug!(symbol = %bucket.symbol, "Enrichment failed: {:#}", e);
                None
            }
            Err(_) => {
                EngineMetrics::incr(&self.metrics.enrichment_timeouts);
                tracing::debug!(
                    symbol = %bucket.symbol,
                    timeout_ms = timeout.as_millis() as u64,
                    "Enrichment timed out"
                );
                None
            }
        }
    }
}

/// Builds the alert for a scored bucket.
///
/// The alert timestamp is the bucket's opening time so that replays produce
/// identical alert content.
#[must_use]
pub fn build_alert(bucket: &ResolvedBucket, decision: &Decision, enrichment: Option<&Enrichment>) -> Alert {
    let displayed = bucket.displayed().or_else(|| bucket.contributions.first());
    let reason = displayed.map_or(signalscan_core::ReasonCode::News, |c| c.reason);

    let channels = bucket.channels();
    let names: Vec<&str> = channels.iter().map(|c| c.as_str()).collect();
    let mut summary = format!(
        "{}: {} [{}] score {:.1}",
        bucket.symbol,
        reason.describe(),
        names.join(", "),
        decision.final_score
    );
    if let Some(enrichment) = enrichment {
        for line in &enrichment.context {
            let _ = write!(summary, " | {line}");
        }
    }

    let mut raw_details = RawDetails::new();
    for c in &bucket.contributions {
        raw_details.insert(
            c.channel.as_str().to_string(),
            serde_json::json!({
                "reason": c.reason,
                "channel_score": c.channel_score,
                "normalized_score": c.normalized_score,
                "weight": c.weight,
                "candidate_id": c.candidate_id,
                "details": c.raw_details,
            }),
        );
    }
    raw_details.insert("base_score".to_string(), serde_json::json!(decision.base_score));
    if decision.boost != 0.0 {
        raw_details.insert("enrichment_boost".to_string(), serde_json::json!(decision.boost));
    }
    if bucket.forced {
        raw_details.insert("flushed".to_string(), serde_json::Value::Bool(true));
    }

    Alert {
        id: Uuid::new_v4(),
        symbol: bucket.symbol.clone(),
        timestamp: bucket.opened_at,
        channels,
        final_score: decision.final_score,
        priority: decision.priority,
        reason,
        summary,
        raw_details,
    }
}
