//! Normalized market and news events consumed by the detection engine.
//!
//! Events are produced entirely outside the engine (ingestion and symbol
//! normalization are upstream collaborators) and are immutable once built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Kind of a normalized event, used for routing and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Trade,
    Bar,
    News,
    Halt,
}

impl EventKind {
    /// Returns the lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Bar => "bar",
            Self::News => "news",
            Self::Halt => "halt",
        }
    }
}

/// Trading session the event was observed in (tagged upstream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    /// 04:00-09:30 ET
    Premarket,
    /// 09:30-16:00 ET
    #[default]
    Regular,
    /// 16:00-20:00 ET
    Afterhours,
    /// Outside all sessions
    Closed,
}

/// Whether a symbol is halted or has resumed trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltStatus {
    Halted,
    Resumed,
}

/// Event payload, one variant per [`EventKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// A single print.
    Trade { price: f64, size: f64 },
    /// An aggregated OHLCV bar.
    Bar {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    },
    /// A news headline attributed to the symbol.
    News {
        headline: String,
        #[serde(default)]
        source: String,
        /// Publication time; the event timestamp is when it was observed.
        published_at: DateTime<Utc>,
    },
    /// A trading halt or resumption notice.
    Halt {
        status: HaltStatus,
        /// Exchange reason code (e.g. "LUDP", "T1").
        #[serde(default)]
        reason_code: String,
    },
}

/// A normalized, UTC-aligned, session-tagged event for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session: Session,
    pub payload: EventPayload,
}

impl NormalizedEvent {
    /// Creates a new event.
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        session: Session,
        payload: EventPayload,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            session,
            payload,
        }
    }

    /// Convenience constructor for a regular-session trade.
    pub fn trade(symbol: impl Into<String>, timestamp: DateTime<Utc>, price: f64, size: f64) -> Self {
        Self::new(
            symbol,
            timestamp,
            Session::Regular,
            EventPayload::Trade { price, size },
        )
    }

    /// Convenience constructor for a halt or resume notice.
    pub fn halt(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        status: HaltStatus,
        reason_code: impl Into<String>,
    ) -> Self {
        Self::new(
            symbol,
            timestamp,
            Session::Regular,
            EventPayload::Halt {
                status,
                reason_code: reason_code.into(),
            },
        )
    }

    /// Convenience constructor for a news headline.
    pub fn news(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        headline: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            symbol,
            timestamp,
            Session::Regular,
            EventPayload::News {
                headline: headline.into(),
                source: String::new(),
                published_at,
            },
        )
    }

    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Trade { .. } => EventKind::Trade,
            EventPayload::Bar { .. } => EventKind::Bar,
            EventPayload::News { .. } => EventKind::News,
            EventPayload::Halt { .. } => EventKind::Halt,
        }
    }

    /// Last traded price carried by the event, if any.
    #[must_use]
    pub fn price(&self) -> Option<f64> {
        match self.payload {
            EventPayload::Trade { price, .. } => Some(price),
            EventPayload::Bar { close, .. } => Some(close),
            _ => None,
        }
    }

    /// Volume carried by the event, if any.
    #[must_use]
    pub fn volume(&self) -> Option<f64> {
        match self.payload {
            EventPayload::Trade { size, .. } => Some(size),
            EventPayload::Bar { volume, .. } => Some(volume),
            _ => None,
        }
    }

    /// Checks the event for malformed content.
    ///
    /// # Errors
    /// Returns an [`InputError`] describing the first defect found.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.symbol.trim().is_empty() {
            return Err(InputError::EmptySymbol);
        }
        match &self.payload {
            EventPayload::Trade { price, size } => {
                check_positive(&self.symbol, "price", *price)?;
                check_non_negative(&self.symbol, "size", *size)?;
            }
            EventPayload::Bar {
                open,
                high,
                low,
                close,
                volume,
            } => {
                for (field, value) in [("open", open), ("high", high), ("low", low), ("close", close)] {
                    check_positive(&self.symbol, field, *value)?;
                }
                check_non_negative(&self.symbol, "volume", *volume)?;
                if high < low || *close > *high || *close < *low {
                    return Err(InputError::InvertedBar {
                        symbol: self.symbol.clone(),
                    });
                }
            }
            EventPayload::News { headline, .. } => {
                if headline.trim().is_empty() {
                    return Err(InputError::EmptyHeadline {
                        symbol: self.symbol.clone(),
                    });
                }
            }
            EventPayload::Halt { .. } => {}
        }
        Ok(())
    }
}

fn check_positive(symbol: &str, field: &'static str, value: f64) -> Result<(), InputError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(InputError::InvalidNumber {
            symbol: symbol.to_string(),
            field,
            value,
        })
    }
}

fn check_non_negative(symbol: &str, field: &'static str, value: f64) -> Result<(), InputError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(InputError::InvalidNumber {
            symbol: symbol.to_string(),
            field,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_accessors() {
        let event = NormalizedEvent::trade("XYZ", Utc::now(), 10.5, 300.0);
        assert_eq!(event.kind(), EventKind::Trade);
        assert_eq!(event.price(), Some(10.5));
        assert_eq!(event.volume(), Some(300.0));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn rejects_empty_symbol() {
        let event = NormalizedEvent::trade("  ", Utc::now(), 10.0, 1.0);
        assert!(matches!(event.validate(), Err(InputError::EmptySymbol)));
    }

    #[test]
    fn rejects_nan_price() {
        let event = NormalizedEvent::trade("XYZ", Utc::now(), f64::NAN, 1.0);
        assert!(matches!(
            event.validate(),
            Err(InputError::InvalidNumber { field: "price", .. })
        ));
    }

    #[test]
    fn rejects_inverted_bar() {
        let event = NormalizedEvent::new(
            "XYZ",
            Utc::now(),
            Session::Regular,
            EventPayload::Bar {
                open: 10.0,
                high: 9.0,
                low: 11.0,
                close: 10.0,
                volume: 100.0,
            },
        );
        assert!(matches!(event.validate(), Err(InputError::InvertedBar { .. })));
    }

    #[test]
    fn halt_has_no_price() {
        let event = NormalizedEvent::halt("ABC", Utc::now(), HaltStatus::Halted, "LUDP");
        assert_eq!(event.kind(), EventKind::Halt);
        assert!(event.price().is_none());
        assert!(event.validate().is_ok());
    }

    #[test]
    fn deserializes_tagged_payload() {
        let json = r#"{
            "symbol": "XYZ",
            "timestamp": "2025-01-02T14:30:00Z",
            "session": "premarket",
            "payload": { "kind": "trade", "price": 4.2, "size": 1000.0 }
        }"#;
        let event: NormalizedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.session, Session::Premarket);
        assert_eq!(event.price(), Some(4.2));
    }
}
