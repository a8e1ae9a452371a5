//! Error taxonomy for the detection engine.
//!
//! Each error class maps to one handling policy: input defects are dropped
//! and counted, detector faults become "no signal", decision faults produce a
//! `decision_error` audit record, and configuration errors fail fast at
//! startup.

use thiserror::Error;

use crate::signal::ChannelId;

/// Malformed, stale or out-of-universe input events.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InputError {
    /// Symbol is empty or whitespace.
    #[error("event has an empty symbol")]
    EmptySymbol,

    /// A numeric field is NaN, infinite or out of range.
    #[error("{symbol}: invalid {field} value {value}")]
    InvalidNumber {
        symbol: String,
        field: &'static str,
        value: f64,
    },

    /// Bar with high below low, or close outside the range.
    #[error("{symbol}: bar range is inverted")]
    InvertedBar { symbol: String },

    /// News headline is empty.
    #[error("{symbol}: news headline is empty")]
    EmptyHeadline { symbol: String },

    /// Symbol is not part of the configured universe.
    #[error("{symbol}: symbol is not in the configured universe")]
    UnknownSymbol { symbol: String },

    /// Event is older than the last accepted event for its symbol.
    #[error("{symbol}: stale event ({lag_ms} ms behind last accepted event)")]
    Stale { symbol: String, lag_ms: i64 },
}

/// Errors raised while updating rolling window state.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WindowError {
    /// Sample value or weight is NaN or infinite.
    #[error("non-finite sample value {0}")]
    NonFinite(f64),

    /// Sample timestamp is earlier than the newest sample in the window.
    #[error("sample is {lag_ms} ms older than the newest sample")]
    OutOfOrder { lag_ms: i64 },
}

/// Internal faults inside one detector invocation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectorError {
    /// Window state rejected a sample.
    #[error("window update failed: {0}")]
    Window(#[from] WindowError),

    /// A derived statistic is NaN or infinite.
    #[error("non-finite statistic {name}={value}")]
    NonFiniteStatistic { name: &'static str, value: f64 },

    /// The detector panicked; state for the symbol has been reset.
    #[error("detector panicked: {0}")]
    Panicked(String),
}

/// Faults while resolving or scoring a bucket.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecisionError {
    /// Resolved bucket has no contributing channels.
    #[error("resolved bucket for {symbol} has no contributing channels")]
    EmptyBucket { symbol: String },

    /// A score computed on the decision path is not finite.
    #[error("non-finite score {value} for channel {channel}")]
    NonFiniteScore { channel: ChannelId, value: f64 },
}

/// Contradictory or out-of-range configuration.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// A single field is out of its allowed range.
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },

    /// Two fields contradict each other.
    #[error("contradictory settings: {0}")]
    Contradiction(String),
}

impl ConfigError {
    /// Creates an [`ConfigError::Invalid`] error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the live pipeline API.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pipeline is shutting down and no longer accepts events.
    #[error("pipeline is shutting down")]
    ShuttingDown,

    /// Event failed validation.
    #[error("rejected input: {0}")]
    Rejected(#[from] InputError),

    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
