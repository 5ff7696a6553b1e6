use crate::core::SpectrumFrame;
use crate::error::{ConfigError, WaterfallError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaterfallConfig {
    /// Maximum number of rows retained
    pub capacity: usize,

    /// Optional bound on the time between the oldest and newest row
    pub max_age_ms: Option<u64>,
}

impl Default for WaterfallConfig {
    fn default() -> Self {
        Self {
            capacity: 800,
            max_age_ms: None,
        }
    }
}

impl WaterfallConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::out_of_range(
                "waterfall.capacity",
                0.0,
                "at least 1",
            ));
        }
        if self.max_age_ms == Some(0) {
            return Err(ConfigError::out_of_range(
                "waterfall.max_age_ms",
                0.0,
                "positive when set",
            ));
        }
        Ok(())
    }
}

/// One persisted spectrum: power column only, the frequency axis is shared
#[derive(Debug, Clone, PartialEq)]
pub struct WaterfallRow {
    pub timestamp_us: u64,
    pub sequence: u64,
    pub degraded: bool,
    pub power_dbm: Arc<[f64]>,
}

/// Inclusive time range in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_us: u64,
    pub end_us: u64,
}

impl TimeWindow {
    pub fn new(start_us: u64, end_us: u64) -> Self {
        Self { start_us, end_us }
    }

    pub fn all() -> Self {
        Self::new(0, u64::MAX)
    }

    /// The `duration` leading up to and including `end_us`
    pub fn trailing(end_us: u64, duration: Duration) -> Self {
        let span = duration.as_micros().min(u64::MAX as u128) as u64;
        Self::new(end_us.saturating_sub(span), end_us)
    }
}

/// Fixed-capacity, time-ordered ring of spectrum rows.
///
/// Width and capacity are fixed at construction; the width is taken from
/// the first appended frame when not given up front.
pub struct WaterfallBuffer {
    rows: VecDeque<WaterfallRow>,
    capacity: usize,
    max_age_us: Option<u64>,
    width: Option<usize>,
    start_frequency_hz: f64,
    bin_width_hz: f64,
    evicted: u64,
}

impl WaterfallBuffer {
    pub fn new(config: &WaterfallConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            rows: VecDeque::with_capacity(config.capacity),
            capacity: config.capacity,
            max_age_us: config.max_age_ms.map(|ms| ms * 1_000),
            width: None,
            start_frequency_hz: 0.0,
            bin_width_hz: 0.0,
            evicted: 0,
        })
    }

    /// Buffer whose row width is fixed before the first frame arrives
    pub fn with_width(config: &WaterfallConfig, width: usize) -> Result<Self, ConfigError> {
        let mut buffer = Self::new(config)?;
        buffer.width = Some(width);
        Ok(buffer)
    }

    pub fn append(&mut self, frame: &SpectrumFrame) -> Result<(), WaterfallError> {
        match self.width {
            Some(expected) if expected != frame.len() => {
                return Err(WaterfallError::WidthMismatch {
                    expected,
                    actual: frame.len(),
                });
            }
            _ => self.width = Some(frame.len()),
        }

        if let Some(newest) = self.rows.back() {
            if frame.timestamp_us <= newest.timestamp_us {
                return Err(WaterfallError::OutOfOrder {
                    timestamp_us: frame.timestamp_us,
                    newest_us: newest.timestamp_us,
                });
            }
        }

        self.start_frequency_hz = frame.center_frequency_hz;
        self.bin_width_hz = frame.bin_width_hz;

        // Strict FIFO: make room first, then drop anything older than max age
        while self.rows.len() >= self.capacity {
            self.rows.pop_front();
            self.evicted += 1;
        }
        self.rows.push_back(WaterfallRow {
            timestamp_us: frame.timestamp_us,
            sequence: frame.sequence,
            degraded: frame.degraded,
            power_dbm: Arc::from(frame.power_dbm.as_slice()),
        });
        if let Some(max_age) = self.max_age_us {
            let cutoff = frame.timestamp_us.saturating_sub(max_age);
            while self.rows.front().is_some_and(|row| row.timestamp_us < cutoff) {
                self.rows.pop_front();
                self.evicted += 1;
            }
        }

        Ok(())
    }

    /// Rows inside `window`, oldest first. Clipped to what is still retained.
    pub fn query(&self, window: TimeWindow) -> Vec<WaterfallRow> {
        if window.end_us < window.start_us {
            return Vec::new();
        }
        let first = self.rows.partition_point(|row| row.timestamp_us < window.start_us);
        let last = self.rows.partition_point(|row| row.timestamp_us <= window.end_us);
        self.rows.range(first..last.max(first)).cloned().collect()
    }

    /// The `n` newest rows, oldest first
    pub fn latest(&self, n: usize) -> Vec<WaterfallRow> {
        let skip = self.rows.len().saturating_sub(n);
        self.rows.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn width(&self) -> Option<usize> {
        self.width
    }

    /// Rows evicted since construction
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Shared frequency axis of every row
    pub fn frequency_axis(&self) -> Vec<f64> {
        (0..self.width.unwrap_or(0))
            .map(|k| self.start_frequency_hz + k as f64 * self.bin_width_hz)
            .collect()
    }

    /// Timestamps of the oldest and newest retained rows
    pub fn time_span(&self) -> Option<(u64, u64)> {
        Some((self.rows.front()?.timestamp_us, self.rows.back()?.timestamp_us))
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}
