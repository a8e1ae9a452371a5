//! Rolling window statistics keyed by symbol.
//!
//! A [`RollingWindow`] keeps running sums so that mean, standard deviation
//! and volume-weighted mean are O(1) to read, and monotonic deques so that
//! min/max eviction is O(1) amortized per update. Windows are either
//! count-bounded or duration-bounded.
//!
//! Reads distinguish cold start ([`Reading::Warming`]) from a ready value so
//! that detectors never trigger on an under-filled window.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use signalscan_core::WindowError;

/// Horizon of a rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSpec {
    /// Keep the last `n` samples.
    Count(usize),
    /// Keep samples newer than `newest - duration`.
    Duration(Duration),
}

/// Statistics over the samples currently in a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation.
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    /// Volume-weighted mean; `None` when the total weight is zero.
    pub vwap: Option<f64>,
    /// Oldest sample value.
    pub first: f64,
    /// Newest sample value.
    pub last: f64,
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
}

/// Result of reading a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// Not enough samples yet; callers must not trigger.
    Warming { have: usize, need: usize },
    Ready(WindowStats),
}

impl Reading {
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    #[must_use]
    pub const fn ready(self) -> Option<WindowStats> {
        match self {
            Self::Ready(stats) => Some(stats),
            Self::Warming { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    seq: u64,
    at: DateTime<Utc>,
    value: f64,
    weight: f64,
}

/// A single rolling window.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    spec: WindowSpec,
    min_samples: usize,
    samples: VecDeque<Sample>,
    sum: f64,
    sum_sq: f64,
    weighted_sum: f64,
    weight_total: f64,
    max_deque: VecDeque<(u64, f64)>,
    min_deque: VecDeque<(u64, f64)>,
    next_seq: u64,
    evictions_since_resync: usize,
}

impl RollingWindow {
    /// Creates a window that reports [`Reading::Ready`] once it holds
    /// `min_samples` samples.
    #[must_use]
    pub fn new(spec: WindowSpec, min_samples: usize) -> Self {
        let capacity = match spec {
            WindowSpec::Count(n) => n,
            WindowSpec::Duration(_) => 16,
        };
        Self {
            spec,
            min_samples: min_samples.max(1),
            samples: VecDeque::with_capacity(capacity),
            sum: 0.0,
            sum_sq: 0.0,
            weighted_sum: 0.0,
            weight_total: 0.0,
            max_deque: VecDeque::new(),
            min_deque: VecDeque::new(),
            next_seq: 0,
            evictions_since_resync: 0,
        }
    }

    #[must_use]
    pub const fn spec(&self) -> WindowSpec {
        self.spec
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Adds an unweighted sample.
    ///
    /// # Errors
    /// Returns an error for non-finite values or samples older than the newest one.
    pub fn push(&mut self, at: DateTime<Utc>, value: f64) -> Result<Reading, WindowError> {
        self.push_weighted(at, value, 1.0)
    }

    /// Adds a sample with a weight (typically volume, for VWAP).
    ///
    /// # Errors
    /// Returns an error for non-finite values or weights, and for samples
    /// older than the newest sample in the window.
    pub fn push_weighted(
        &mut self,
        at: DateTime<Utc>,
        value: f64,
        weight: f64,
    ) -> Result<Reading, WindowError> {
        if !value.is_finite() {
            return Err(WindowError::NonFinite(value));
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(WindowError::NonFinite(weight));
        }
        if let Some(newest) = self.samples.back() {
            if at < newest.at {
                return Err(WindowError::OutOfOrder {
                    lag_ms: (newest.at - at).num_milliseconds(),
                });
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.samples.push_back(Sample {
            seq,
            at,
            value,
            weight,
        });
        self.sum += value;
        self.sum_sq += value * value;
        self.weighted_sum += value * weight;
        self.weight_total += weight;

        while self.max_deque.back().is_some_and(|&(_, v)| v <= value) {
            self.max_deque.pop_back();
        }
        self.max_deque.push_back((seq, value));
        while self.min_deque.back().is_some_and(|&(_, v)| v >= value) {
            self.min_deque.pop_back();
        }
        self.min_deque.push_back((seq, value));

        self.evict(at);
        Ok(self.read())
    }

    fn evict(&mut self, newest: DateTime<Utc>) {
        loop {
            let expired = match (self.spec, self.samples.front()) {
                (_, None) => false,
                (WindowSpec::Count(n), Some(_)) => self.samples.len() > n.max(1),
                (WindowSpec::Duration(d), Some(oldest)) => oldest.at <= newest - d,
            };
            if !expired {
                break;
            }
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old.value;
                self.sum_sq -= old.value * old.value;
                self.weighted_sum -= old.value * old.weight;
                self.weight_total -= old.weight;
                if self.max_deque.front().is_some_and(|&(s, _)| s == old.seq) {
                    self.max_deque.pop_front();
                }
                if self.min_deque.front().is_some_and(|&(s, _)| s == old.seq) {
                    self.min_deque.pop_front();
                }
                self.evictions_since_resync += 1;
            }
        }

        // Running sums drift under long add/subtract sequences.
        let resync_after = match self.spec {
            WindowSpec::Count(n) => n.max(64) * 16,
            WindowSpec::Duration(_) => 4_096,
        };
        if self.evictions_since_resync >= resync_after {
            self.resync();
        }
    }

    fn resync(&mut self) {
        self.sum = self.samples.iter().map(|s| s.value).sum();
        self.sum_sq = self.samples.iter().map(|s| s.value * s.value).sum();
        self.weighted_sum = self.samples.iter().map(|s| s.value * s.weight).sum();
        self.weight_total = self.samples.iter().map(|s| s.weight).sum();
        self.evictions_since_resync = 0;
    }

    /// Median of the samples, or `None` during cold start.
    #[must_use]
    pub fn median(&self) -> Option<f64> {
        if self.samples.len() < self.min_samples {
            return None;
        }
        let mut values: Vec<f64> = self.samples.iter().map(|s| s.value).collect();
        values.sort_by(f64::total_cmp);
        let mid = values.len() / 2;
        if values.len() % 2 == 0 {
            Some((values[mid - 1] + values[mid]) / 2.0)
        } else {
            values.get(mid).copied()
        }
    }

    /// Returns the current statistics, or `Warming` during cold start.
    #[must_use]
    pub fn read(&self) -> Reading {
        let count = self.samples.len();
        if count < self.min_samples {
            return Reading::Warming {
                have: count,
                need: self.min_samples,
            };
        }
        let (Some(first), Some(last), Some(&(_, max)), Some(&(_, min))) = (
            self.samples.front(),
            self.samples.back(),
            self.max_deque.front(),
            self.min_deque.front(),
        ) else {
            return Reading::Warming {
                have: count,
                need: self.min_samples,
            };
        };

        #[allow(clippy::cast_precision_loss)]
        let n = count as f64;
        let mean = self.sum / n;
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        let vwap = (self.weight_total > f64::EPSILON).then(|| self.weighted_sum / self.weight_total);

        Reading::Ready(WindowStats {
            count,
            mean,
            stddev: variance.sqrt(),
            min,
            max,
            vwap,
            first: first.value,
            last: last.value,
            first_at: first.at,
            last_at: last.at,
        })
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.max_deque.clear();
        self.min_deque.clear();
        self.sum = 0.0;
        self.sum_sq = 0.0;
        self.weighted_sum = 0.0;
        self.weight_total = 0.0;
        self.evictions_since_resync = 0;
    }
}

/// Average true range over a rolling window of true-range samples.
#[derive(Debug, Clone)]
pub struct AtrWindow {
    prev_close: Option<f64>,
    ranges: RollingWindow,
}

impl AtrWindow {
    #[must_use]
    pub fn new(length: usize, min_samples: usize) -> Self {
        Self {
            prev_close: None,
            ranges: RollingWindow::new(WindowSpec::Count(length), min_samples),
        }
    }

    /// True range of a bar against the previous close.
    #[must_use]
    pub fn true_range(high: f64, low: f64, prev_close: Option<f64>) -> f64 {
        let span = high - low;
        match prev_close {
            Some(pc) => span.max((high - pc).abs()).max((low - pc).abs()),
            None => span,
        }
    }

    /// Adds a bar (or a trade, with `high == low == close`).
    ///
    /// # Errors
    /// Propagates window errors for non-finite or out-of-order input.
    pub fn update(
        &mut self,
        at: DateTime<Utc>,
        high: f64,
        low: f64,
        close: f64,
    ) -> Result<Reading, WindowError> {
        let tr = Self::true_range(high, low, self.prev_close);
        let reading = self.ranges.push(at, tr)?;
        self.prev_close = Some(close);
        Ok(reading)
    }

    #[must_use]
    pub fn read(&self) -> Reading {
        self.ranges.read()
    }
}

/// Per-symbol rolling windows sharing one horizon.
///
/// Each detector owns its own stores, so two detectors (or two window types
/// within one detector) never see each other's samples.
#[derive(Debug, Clone)]
pub struct RollingWindowStore {
    spec: WindowSpec,
    min_samples: usize,
    windows: HashMap<String, RollingWindow>,
}

impl RollingWindowStore {
    #[must_use]
    pub fn new(spec: WindowSpec, min_samples: usize) -> Self {
        Self {
            spec,
            min_samples,
            windows: HashMap::new(),
        }
    }

    /// Adds a sample for a symbol and returns the updated reading.
    ///
    /// # Errors
    /// Returns an error for non-finite or out-of-order samples.
    pub fn update(
        &mut self,
        symbol: &str,
        value: f64,
        at: DateTime<Utc>,
    ) -> Result<Reading, WindowError> {
        self.window_mut(symbol).push(at, value)
    }

    /// Adds a weighted sample for a symbol.
    ///
    /// # Errors
    /// Returns an error for non-finite or out-of-order samples.
    pub fn update_weighted(
        &mut self,
        symbol: &str,
        value: f64,
        weight: f64,
        at: DateTime<Utc>,
    ) -> Result<Reading, WindowError> {
        self.window_mut(symbol).push_weighted(at, value, weight)
    }

    /// Reads a symbol's window; unknown symbols are warming with zero samples.
    #[must_use]
    pub fn read(&self, symbol: &str) -> Reading {
        self.windows.get(symbol).map_or(
            Reading::Warming {
                have: 0,
                need: self.min_samples.max(1),
            },
            RollingWindow::read,
        )
    }

    /// Median of a symbol's window; `None` while warming.
    #[must_use]
    pub fn median(&self, symbol: &str) -> Option<f64> {
        self.windows.get(symbol).and_then(RollingWindow::median)
    }

    /// Drops all state for a symbol (back to cold start).
    pub fn reset(&mut self, symbol: &str) {
        self.windows.remove(symbol);
    }

    #[must_use]
    pub fn symbols(&self) -> usize {
        self.windows.len()
    }

    fn window_mut(&mut self, symbol: &str) -> &mut RollingWindow {
        let (spec, min_samples) = (self.spec, self.min_samples);
        self.windows
            .entry(symbol.to_string())
            .or_insert_with(|| RollingWindow::new(spec, min_samples))
    }
}
