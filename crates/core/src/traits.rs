use crate::signal::{Alert, AuditRecord};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Context attached to an alert by an [`Enricher`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    /// Human-readable context lines appended to the alert summary.
    pub context: Vec<String>,
    /// Bounded additive score adjustment.
    pub score_boost: f64,
}

/// Optional source of alert context (float, short interest, recent news).
///
/// Called from the decision stage under a timeout; a slow or failing
/// enricher never blocks a decision.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, symbol: &str, at: DateTime<Utc>) -> Result<Option<Enrichment>>;
}

/// Destination for emitted alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> Result<()>;
    fn name(&self) -> &str;
}

/// Append-only audit destination.
///
/// `record` must not block the decision path; implementations queue or
/// buffer internally.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);

    /// Flushes buffered records. Called once at shutdown.
    fn flush(&self) {}
}
