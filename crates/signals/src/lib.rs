//! Real-time signal detection and alert decisions.
//!
//! Detectors turn normalized market and news events into candidate signals;
//! candidates are normalized, merged per symbol and reason family, scored,
//! rate-limited and routed by priority. [`SignalEngine`] runs the stages
//! inline for deterministic replays, [`SignalPipeline`] runs them as
//! concurrent tasks for live feeds.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub mod aggregator;
pub mod audit;
pub mod bus;
pub mod decision;
pub mod dedup;
pub mod delivery;
pub mod detector;
pub mod engine;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod runner;
pub mod scoring;
pub mod suppression;
pub mod throttle;
pub mod window;

pub use aggregator::{normalize_with, Normalizer, WeightedCandidate};
pub use audit::{JsonlAuditSink, MemoryAuditSink, NullAuditSink};
pub use bus::{CandidateBus, PushOutcome};
pub use decision::{build_alert, DecisionStage};
pub use dedup::{Contribution, DedupEngine, DedupKey, Offer, ResolvedBucket};
pub use delivery::{ChannelAlertSink, StdoutAlertSink};
pub use detector::{build_detector, guarded_process, Detector, TriggerGate};
pub use engine::SignalEngine;
pub use pipeline::{EventClock, PipelineBuilder, SignalPipeline};
pub use registry::DetectorRegistry;
pub use router::{PriorityRouter, Route, RouterTasks};
pub use runner::{ChannelRunner, InboxPush, RunnerInbox};
pub use scoring::{classify, combine, decide, Decision};
pub use suppression::{RollingCounter, SuppressionEngine};
pub use window::{AtrWindow, Reading, RollingWindow, RollingWindowStore, WindowSpec, WindowStats};

/// Maps a symbol to one of `partitions` shards.
///
/// Stable for the life of the process; used for runner partitions, dedup and
/// suppression shards, and decision workers alike.
#[must_use]
pub fn partition_for(symbol: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    symbol.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}
