//! Alert delivery adapters.
//!
//! Retry and backoff belong to the downstream collaborator; these sinks make
//! a single attempt and report failure to the router.

use std::io::Write;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use signalscan_core::{Alert, AlertSink};
use tokio::sync::mpsc;

/// Writes each alert as one JSON line on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutAlertSink;

#[async_trait]
impl AlertSink for StdoutAlertSink {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let line = serde_json::to_string(alert)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Forwards alerts into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::Sender<Alert>,
}

impl ChannelAlertSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<Alert>) -> Self {
        Self { tx }
    }

    /// Creates a sink together with its receiving end.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AlertSink for ChannelAlertSink {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        self.tx
            .send(alert.clone())
            .await
            .map_err(|_| anyhow!("alert receiver dropped"))
    }

    fn name(&self) -> &str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::test_support::at;
    use signalscan_core::{ChannelId, Priority, RawDetails, ReasonCode};
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn alert() -> Alert {
        Alert {
            id: Uuid::new_v4(),
            symbol: "ABC".to_string(),
            timestamp: at(0),
            channels: BTreeSet::from([ChannelId::Halt]),
            final_score: 100.0,
            priority: Priority::Critical,
            reason: ReasonCode::Halt,
            summary: "ABC: Trading halted".to_string(),
            raw_details: RawDetails::new(),
        }
    }

    #[tokio::test]
    async fn channel_sink_forwards_and_fails_when_closed() {
        let (sink, mut rx) = ChannelAlertSink::channel(4);
        sink.deliver(&alert()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().symbol, "ABC");

        drop(rx);
        assert!(sink.deliver(&alert()).await.is_err());
        assert_eq!(sink.name(), "channel");
    }
}
