//! Priority routing of emitted alerts.
//!
//! High and critical alerts go through a minimally buffered fast lane with
//! its own dispatcher task; everything else goes through the normal lane.
//! The fast lane waits for capacity (it is never shed), while the normal
//! lane sheds on a full buffer so it cannot hold up the decision workers.
//! Each lane delivers in order; the lanes never wait on each other.

use std::sync::Arc;

use signalscan_core::{Alert, AlertSink, EngineMetrics, RouterConfig};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::throttle::LogThrottle;

/// Which lane took an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Fast,
    Normal,
    /// Normal lane full; the alert was shed.
    Dropped,
    /// The dispatcher is gone.
    Closed,
}

pub struct PriorityRouter {
    fast: mpsc::Sender<Alert>,
    normal: mpsc::Sender<Alert>,
    metrics: Arc<EngineMetrics>,
    drop_log: LogThrottle,
}

/// Dispatcher tasks of a [`PriorityRouter`].
#[derive(Debug)]
pub struct RouterTasks {
    fast: JoinHandle<()>,
    normal: JoinHandle<()>,
}

impl RouterTasks {
    /// Waits for both dispatchers to drain. They finish once every handle
    /// to the router has been dropped.
    pub async fn join(self) {
        for (lane, handle) in [("fast", self.fast), ("normal", self.normal)] {
            if let Err(e) = handle.await {
                tracing::error!(lane, "Alert dispatcher task failed: {}", e);
            }
        }
    }
}

impl PriorityRouter {
    /// Creates the router and spawns one dispatcher per lane.
    #[must_use]
    pub fn spawn(
        config: &RouterConfig,
        sink: Arc<dyn AlertSink>,
        metrics: Arc<EngineMetrics>,
    ) -> (Self, RouterTasks) {
        let (fast_tx, fast_rx) = mpsc::channel(config.critical_buffer.max(1));
        let (normal_tx, normal_rx) = mpsc::channel(config.normal_buffer.max(1));

        let tasks = RouterTasks {
            fast: tokio::spawn(dispatch("fast", fast_rx, Arc::clone(&sink), Arc::clone(&metrics))),
            normal: tokio::spawn(dispatch("normal", normal_rx, sink, Arc::clone(&metrics))),
        };
        let router = Self {
            fast: fast_tx,
            normal: normal_tx,
            metrics,
            drop_log: LogThrottle::per_second(1),
        };
        (router, tasks)
    }

    /// Hands an alert to the lane matching its priority.
    pub async fn route(&self, alert: Alert) -> Route {
        if alert.priority.is_fast_path() {
            return match self.fast.send(alert).await {
                Ok(()) => {
                    EngineMetrics::incr(&self.metrics.routed_fast);
                    Route::Fast
                }
                Err(_) => Route::Closed,
            };
        }

        match self.normal.try_send(alert) {
            Ok(()) => {
                EngineMetrics::incr(&self.metrics.routed_normal);
                Route::Normal
            }
            Err(TrySendError::Full(alert)) => {
                EngineMetrics::incr(&self.metrics.router_dropped);
                if let Some(suppressed) = self.drop_log.allow() {
                    tracing::warn!(
                        symbol = %alert.symbol,
                        alert_id = %alert.id,
                        priority = %alert.priority,
                        suppressed_logs = suppressed,
                        "Normal delivery lane full, dropping alert"
                    );
                }
                Route::Dropped
            }
            Err(TrySendError::Closed(_)) => Route::Closed,
        }
    }
}

async fn dispatch(
    lane: &'static str,
    mut rx: mpsc::Receiver<Alert>,
    sink: Arc<dyn AlertSink>,
    metrics: Arc<EngineMetrics>,
) {
    let failure_log = LogThrottle::per_second(1);
    while let Some(alert) = rx.recv().await {
        if let Err(e) = sink.deliver(&alert).await {
            EngineMetrics::incr(&metrics.delivery_failures);
            if let Some(suppressed) = failure_log.allow() {
                tracing::warn!(
                    lane,
                    sink = sink.name(),
                    symbol = %alert.symbol,
                    alert_id = %alert.id,
                    suppressed_logs = suppressed,
                    "Alert delivery failed: {:#}",
                    e
                );
            }
        } else {
            tracing::debug!(lane, symbol = %alert.symbol, alert_id = %alert.id, "Alert delivered");
        }
    }
    tracing::debug!(lane, "Alert dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::ChannelAlertSink;
    use crate::detector::test_support::at;
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use signalscan_core::{ChannelId, Priority, RawDetails, ReasonCode};
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tokio::time::Instant;
    use uuid::Uuid;

    fn alert(symbol: &str, priority: Priority) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            timestamp: at(0),
            channels: BTreeSet::from([ChannelId::PriceSpike]),
            final_score: 70.0,
            priority,
            reason: ReasonCode::PriceSpikeUp,
            summary: String::new(),
            raw_details: RawDetails::new(),
        }
    }

    /// Takes one second per normal alert; fast-path alerts are immediate.
    #[derive(Default)]
    struct SlowNormalSink {
        delivered: Mutex<Vec<(Priority, Instant)>>,
    }

    #[async_trait]
    impl AlertSink for SlowNormalSink {
        async fn deliver(&self, alert: &Alert) -> Result<()> {
            if !alert.priority.is_fast_path() {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            self.delivered.lock().push((alert.priority, Instant::now()));
            Ok(())
        }

        fn name(&self) -> &str {
            "slow-normal"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn critical_alert_is_not_queued_behind_normal_backlog() {
        let sink = Arc::new(SlowNormalSink::default());
        let metrics = Arc::new(EngineMetrics::new());
        let config = RouterConfig {
            normal_buffer: 64,
            critical_buffer: 1,
        };
        let (router, tasks) =
            PriorityRouter::spawn(&config, Arc::clone(&sink) as Arc<dyn AlertSink>, Arc::clone(&metrics));

        let start = Instant::now();
        for _ in 0..10 {
            assert_eq!(router.route(alert("XYZ", Priority::Medium)).await, Route::Normal);
        }
        assert_eq!(router.route(alert("ABC", Priority::Critical)).await, Route::Fast);

        drop(router);
        tasks.join().await;

        let delivered = sink.delivered.lock().clone();
        assert_eq!(delivered.len(), 11);
        let (_, critical_at) = delivered
            .iter()
            .find(|(p, _)| *p == Priority::Critical)
            .copied()
            .unwrap();
        assert!(critical_at - start < Duration::from_millis(10));
        let (_, last_normal) = delivered.last().copied().unwrap();
        assert!(last_normal - start >= Duration::from_secs(10));

        let snap = metrics.snapshot();
        assert_eq!(snap.routed_fast, 1);
        assert_eq!(snap.routed_normal, 10);
    }

    #[tokio::test]
    async fn full_normal_lane_sheds_but_fast_lane_waits() {
        let (sink, mut rx) = ChannelAlertSink::channel(1);
        let metrics = Arc::new(EngineMetrics::new());
        let config = RouterConfig {
            normal_buffer: 1,
            critical_buffer: 1,
        };
        let (router, tasks) = PriorityRouter::spawn(&config, Arc::new(sink), Arc::clone(&metrics));

        // nothing drains the sink receiver yet, so the normal lane backs up
        let mut routes = Vec::new();
        for _ in 0..5 {
            routes.push(router.route(alert("XYZ", Priority::Low)).await);
            tokio::task::yield_now().await;
        }
        assert!(routes.contains(&Route::Dropped));
        assert!(metrics.snapshot().router_dropped >= 1);

        let collector = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(a) = rx.recv().await {
                seen.push(a.priority);
            }
            seen
        });
        assert_eq!(router.route(alert("ABC", Priority::High)).await, Route::Fast);

        drop(router);
        tasks.join().await;
        let seen = collector.await.unwrap();
        assert!(seen.contains(&Priority::High));
        assert_eq!(metrics.snapshot().delivery_failures, 0);
    }
}
