pub mod config;
pub mod config_loader;
pub mod config_watcher;
pub mod error;
pub mod events;
pub mod metrics;
pub mod metrics_formatter;
pub mod signal;
pub mod traits;

pub use config::{
    ChannelCommon, ChannelsConfig, CrossoverConfig, DedupConfig, EngineConfig, HaltConfig,
    MeanReversionConfig, MomentumConfig, NewsConfig, PatternConfig, PriceSpikeConfig,
    ReasonPolicy, RouterConfig, RuntimeConfig, ScoreCombination, ScoringConfig,
    SuppressionConfig, VolatilitySurgeConfig, VolumeSpikeConfig,
};
pub use config_loader::ConfigLoader;
pub use config_watcher::{ConfigWatcher, SharedConfig};
pub use error::{ConfigError, DecisionError, DetectorError, InputError, PipelineError, WindowError};
pub use events::{EventKind, EventPayload, HaltStatus, NormalizedEvent, Session};
pub use metrics::{EngineMetrics, LatencyHistogram, MetricsSnapshot};
pub use metrics_formatter::MetricsFormatter;
pub use signal::{
    Alert, AuditRecord, CandidateSignal, ChannelId, DecisionRecord, Disposition, Priority,
    RawDetails, ReasonCode, SuppressionReason,
};
pub use traits::{AlertSink, AuditSink, Enricher, Enrichment};
