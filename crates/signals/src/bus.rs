//! Bounded multi-producer conduit from channel runners to the aggregator.
//!
//! Producers never block. When the bus is full the lowest-scoring
//! sheddable candidate (queued or incoming) is dropped. Halt and news
//! candidates are never dropped, so they may push the bus over capacity.
//! Priority-exempt candidates (halt, resume, confirmed breaking news) are
//! also served ahead of everything else.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use signalscan_core::{CandidateSignal, EngineMetrics};
use tokio::sync::Notify;

use crate::throttle::LogThrottle;

/// Result of [`CandidateBus::push`].
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Accepted,
    /// Accepted after evicting a queued lower-score candidate.
    Evicted(CandidateSignal),
    /// The incoming candidate was the lowest and was dropped.
    Dropped(CandidateSignal),
    /// The bus is closed.
    Closed(CandidateSignal),
}

#[derive(Debug, Default)]
struct BusState {
    priority: VecDeque<CandidateSignal>,
    normal: VecDeque<CandidateSignal>,
    closed: bool,
}

impl BusState {
    fn len(&self) -> usize {
        self.priority.len() + self.normal.len()
    }
}

pub struct CandidateBus {
    state: Mutex<BusState>,
    notify: Notify,
    capacity: usize,
    metrics: Arc<EngineMetrics>,
    drop_log: LogThrottle,
}

impl CandidateBus {
    #[must_use]
    pub fn new(capacity: usize, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            metrics,
            drop_log: LogThrottle::per_second(1),
        }
    }

    /// Enqueues a candidate without blocking.
    pub fn push(&self, candidate: CandidateSignal) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Closed(candidate);
            }

            if candidate.is_priority_exempt() {
                state.priority.push_back(candidate);
                PushOutcome::Accepted
            } else if state.len() < self.capacity {
                state.normal.push_back(candidate);
                PushOutcome::Accepted
            } else {
                let protected = candidate.reason.is_shed_protected();
                let lowest = state
                    .normal
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| !c.reason.is_shed_protected())
                    .min_by(|(_, a), (_, b)| a.channel_score.total_cmp(&b.channel_score))
                    .map(|(idx, c)| (idx, c.channel_score));
                match lowest {
                    Some((idx, score)) if protected || score < candidate.channel_score => {
                        let evicted = state.normal.remove(idx);
                        state.normal.push_back(candidate);
                        match evicted {
                            Some(evicted) => PushOutcome::Evicted(evicted),
                            None => PushOutcome::Accepted,
                        }
                    }
                    _ if protected => {
                        state.normal.push_back(candidate);
                        PushOutcome::Accepted
                    }
                    _ => PushOutcome::Dropped(candidate),
                }
            }
        };

        match &outcome {
            PushOutcome::Accepted => self.notify.notify_one(),
            PushOutcome::Evicted(dropped) | PushOutcome::Dropped(dropped) => {
                EngineMetrics::incr(&self.metrics.bus_dropped);
                if let Some(suppressed) = self.drop_log.allow() {
                    tracing::warn!(
                        symbol = %dropped.symbol,
                        channel = %dropped.channel,
                        score = dropped.channel_score,
                        suppressed_logs = suppressed,
                        "Candidate bus full, dropped lowest-score candidate"
                    );
                }
                if matches!(outcome, PushOutcome::Evicted(_)) {
                    self.notify.notify_one();
                }
            }
            PushOutcome::Closed(_) => {}
        }
        outcome
    }

    /// Takes the next candidate without waiting.
    #[must_use]
    pub fn try_pop(&self) -> Option<CandidateSignal> {
        let mut state = self.state.lock();
        state.priority.pop_front().or_else(|| state.normal.pop_front())
    }

    /// Waits for the next candidate. Returns `None` once the bus is closed
    /// and drained.
    pub async fn pop(&self) -> Option<CandidateSignal> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if let Some(c) = state.priority.pop_front().or_else(|| state.normal.pop_front()) {
                    return Some(c);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stops accepting candidates; queued ones can still be drained.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
