//! Channel runners.
//!
//! A [`ChannelRunner`] owns one detector for one symbol partition. Events
//! arrive through a [`RunnerInbox`] that keeps a bounded queue per symbol and
//! serves symbols round-robin, so a hot symbol cannot starve the rest of the
//! partition. Per-symbol order is preserved; when a symbol's queue is full
//! the oldest queued event is dropped (bounded loss instead of blocking the
//! producer).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use signalscan_core::{
    ChannelId, EngineConfig, EngineMetrics, NormalizedEvent, SharedConfig,
};
use tokio::sync::Notify;

use crate::bus::{CandidateBus, PushOutcome};
use crate::detector::{build_detector, guarded_process, Detector};
use crate::throttle::LogThrottle;

/// Result of [`RunnerInbox::push`].
#[derive(Debug, Clone, PartialEq)]
pub enum InboxPush {
    Queued,
    /// Queued after dropping the oldest event for the same symbol.
    DroppedOldest(NormalizedEvent),
    /// The inbox no longer accepts events.
    Closed,
}

#[derive(Debug, Default)]
struct InboxState {
    queues: HashMap<String, VecDeque<NormalizedEvent>>,
    /// Symbols with queued events, in service order. Each appears once.
    ready: VecDeque<String>,
    closed: bool,
}

/// Per-symbol bounded queues with round-robin service.
pub struct RunnerInbox {
    state: Mutex<InboxState>,
    notify: Notify,
    per_symbol_capacity: usize,
}

impl RunnerInbox {
    #[must_use]
    pub fn new(per_symbol_capacity: usize) -> Self {
        Self {
            state: Mutex::new(InboxState::default()),
            notify: Notify::new(),
            per_symbol_capacity: per_symbol_capacity.max(1),
        }
    }

    /// Enqueues an event without blocking.
    pub fn push(&self, event: NormalizedEvent) -> InboxPush {
        let result = {
            let mut state = self.state.lock();
            if state.closed {
                return InboxPush::Closed;
            }
            let symbol = event.symbol.clone();
            let queue = state.queues.entry(symbol.clone()).or_default();
            let was_empty = queue.is_empty();
            let dropped = if queue.len() >= self.per_symbol_capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(event);
            if was_empty {
                state.ready.push_back(symbol);
            }
            dropped.map_or(InboxPush::Queued, InboxPush::DroppedOldest)
        };
        self.notify.notify_one();
        result
    }

    fn take_next(state: &mut InboxState) -> Option<NormalizedEvent> {
        while let Some(symbol) = state.ready.pop_front() {
            let Some(queue) = state.queues.get_mut(&symbol) else {
                continue;
            };
            let event = queue.pop_front();
            if queue.is_empty() {
                state.queues.remove(&symbol);
            } else {
                state.ready.push_back(symbol);
            }
            if event.is_some() {
                return event;
            }
        }
        None
    }

    /// Takes the next event without waiting.
    #[must_use]
    pub fn try_pop(&self) -> Option<NormalizedEvent> {
        Self::take_next(&mut self.state.lock())
    }

    /// Waits for the next event. Returns `None` once closed and drained.
    pub async fn pop(&self) -> Option<NormalizedEvent> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if let Some(event) = Self::take_next(&mut state) {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stops accepting events; queued events are still served.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Closes and discards every queued event. Returns how many were dropped.
    pub fn abandon(&self) -> usize {
        let dropped = {
            let mut state = self.state.lock();
            state.closed = true;
            state.ready.clear();
            state.queues.drain().map(|(_, q)| q.len()).sum()
        };
        self.notify.notify_waiters();
        dropped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().queues.values().map(VecDeque::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs one detector over one partition's events.
pub struct ChannelRunner {
    channel: ChannelId,
    partition: usize,
    detector: Box<dyn Detector>,
    inbox: Arc<RunnerInbox>,
    bus: Arc<CandidateBus>,
    config: SharedConfig,
    applied: Arc<EngineConfig>,
    metrics: Arc<EngineMetrics>,
    fault_log: LogThrottle,
}

impl ChannelRunner {
    #[must_use]
    pub fn new(
        channel: ChannelId,
        partition: usize,
        inbox: Arc<RunnerInbox>,
        bus: Arc<CandidateBus>,
        config: SharedConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let applied = Arc::clone(&config.borrow());
        Self {
            channel,
            partition,
            detector: build_detector(channel, &applied.channels),
            inbox,
            bus,
            config,
            applied,
            metrics,
            fault_log: LogThrottle::per_second(1),
        }
    }

    #[must_use]
    pub const fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Picks up a new config snapshot, rebuilding the detector if its
    /// settings changed.
    fn refresh_config(&mut self) -> Arc<EngineConfig> {
        let current = Arc::clone(&self.config.borrow());
        if !Arc::ptr_eq(&current, &self.applied) {
            if self.applied.channels.detector_changed(&current.channels, self.channel) {
                tracing::info!(
                    channel = %self.channel,
                    partition = self.partition,
                    "Detector settings changed, rebuilding (cold start)"
                );
                self.detector = build_detector(self.channel, &current.channels);
            }
            self.applied = Arc::clone(&current);
        }
        current
    }

    /// Handles one event: runs the detector and forwards candidates.
    pub fn handle(&mut self, event: &NormalizedEvent) {
        let config = self.refresh_config();
        if !config.channels.common(self.channel).enabled {
            return;
        }

        match guarded_process(self.detector.as_mut(), event) {
            Ok(candidates) => {
                for candidate in candidates {
                    if let PushOutcome::Closed(c) = self.bus.push(candidate) {
                        tracing::debug!(
                            channel = %self.channel,
                            symbol = %c.symbol,
                            "Bus closed, discarding candidate"
                        );
                    }
                }
            }
            Err(e) => {
                self.metrics.record_detector_fault(self.channel);
                if let Some(suppressed) = self.fault_log.allow() {
                    tracing::warn!(
                        channel = %self.channel,
                        symbol = %event.symbol,
                        error = %e,
                        suppressed_logs = suppressed,
                        "Detector fault, event skipped"
                    );
                }
            }
        }
    }

    /// Serves the inbox until it is closed and drained (or abandoned).
    pub async fn run(mut self) {
        tracing::debug!(channel = %self.channel, partition = self.partition, "Channel runner started");
        let mut handled: u64 = 0;
        while let Some(event) = self.inbox.pop().await {
            self.handle(&event);
            handled += 1;
            if handled % 64 == 0 {
                tokio::task::yield_now().await;
            }
        }
        tracing::debug!(
            channel = %self.channel,
            partition = self.partition,
            handled,
            "Channel runner stopped"
        );
    }
}

/// Records an inbox overload drop.
pub(crate) fn note_overload(
    metrics: &EngineMetrics,
    throttle: &LogThrottle,
    channel: ChannelId,
    dropped: &NormalizedEvent,
) {
    EngineMetrics::incr(&metrics.runner_dropped);
    if let Some(suppressed) = throttle.allow() {
        tracing::warn!(
            channel = %channel,
            symbol = %dropped.symbol,
            suppressed_logs = suppressed,
            "Runner queue full, dropped oldest event"
        );
    }
}
