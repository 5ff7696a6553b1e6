use serde::{Deserialize, Serialize};
use std::ops::Range;

/// One power-vs-frequency snapshot produced from a single sample block.
///
/// Only the power column is stored; bin `k` sits at
/// `center_frequency_hz + k * bin_width_hz`, so the frequency axis is strictly
/// increasing and evenly spaced by `span_hz / (len - 1)` by construction.
///
/// The spectrum is folded single-sided: bin `k` holds the power at both
/// `+k` and `-k` bin offsets from the tuned frequency. The axis therefore
/// starts at the tuned frequency and labels each bin by its positive offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumFrame {
    /// Sequence number of the block this frame was computed from
    pub sequence: u64,

    /// Capture timestamp in microseconds
    pub timestamp_us: u64,

    /// Tuned frequency, which is also the frequency of bin 0
    pub center_frequency_hz: f64,
    pub sample_rate_hz: f64,
    pub bin_width_hz: f64,

    /// Distance between the first and last bin
    pub span_hz: f64,

    /// Single-sided power per bin, clamped to the configured floor
    pub power_dbm: Vec<f64>,

    /// Number of blocks folded into the running average
    pub averaging_count: u32,

    /// Derived from a block with a known acquisition gap
    pub degraded: bool,
}

impl SpectrumFrame {
    pub fn len(&self) -> usize {
        self.power_dbm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.power_dbm.is_empty()
    }

    pub fn frequency_at(&self, bin: usize) -> f64 {
        self.center_frequency_hz + bin as f64 * self.bin_width_hz
    }

    /// (frequency_hz, power_dbm) pairs in ascending frequency
    pub fn bins(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.power_dbm
            .iter()
            .enumerate()
            .map(|(k, &p)| (self.frequency_at(k), p))
    }

    /// Nearest bin to `frequency_hz`, or None if it lies outside the frame
    pub fn bin_for_frequency(&self, frequency_hz: f64) -> Option<usize> {
        if self.is_empty() || self.bin_width_hz <= 0.0 {
            return None;
        }
        let offset = (frequency_hz - self.center_frequency_hz) / self.bin_width_hz;
        let half = 0.5;
        if offset < -half || offset > (self.len() - 1) as f64 + half {
            return None;
        }
        Some((offset.round().max(0.0) as usize).min(self.len() - 1))
    }

    /// Bins whose centre frequency falls inside `[low_hz, high_hz]`
    pub fn bins_in_range(&self, low_hz: f64, high_hz: f64) -> Range<usize> {
        if self.is_empty() || self.bin_width_hz <= 0.0 || high_hz < low_hz {
            return 0..0;
        }
        let start = ((low_hz - self.center_frequency_hz) / self.bin_width_hz).ceil();
        let end = ((high_hz - self.center_frequency_hz) / self.bin_width_hz).floor();
        let start = start.max(0.0) as usize;
        let end = end.min((self.len() - 1) as f64);
        if end < 0.0 || (end as usize) < start {
            return 0..0;
        }
        start..end as usize + 1
    }

    /// Strongest bin within the range as (bin, frequency_hz, power_dbm)
    pub fn max_in_range(&self, low_hz: f64, high_hz: f64) -> Option<(usize, f64, f64)> {
        self.bins_in_range(low_hz, high_hz)
            .map(|k| (k, self.frequency_at(k), self.power_dbm[k]))
            .fold(None, |best, cur| match best {
                Some((_, _, p)) if p >= cur.2 => best,
                _ => Some(cur),
            })
    }

    /// Strongest bin of the whole frame as (frequency_hz, power_dbm)
    pub fn strongest(&self) -> Option<(f64, f64)> {
        if self.is_empty() {
            return None;
        }
        self.max_in_range(self.frequency_at(0), self.frequency_at(self.len() - 1))
            .map(|(_, f, p)| (f, p))
    }

    /// 10th percentile of bin powers
    pub fn noise_floor_dbm(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let mut sorted = self.power_dbm.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Some(sorted[(sorted.len() - 1) / 10])
    }

    pub fn dynamic_range_db(&self) -> Option<f64> {
        let max = self.power_dbm.iter().copied().reduce(f64::max)?;
        let min = self.power_dbm.iter().copied().reduce(f64::min)?;
        Some(max - min)
    }

    /// Peak power within `bandwidth_hz` around `frequency_hz` minus the mean
    /// power of every bin outside that band.
    pub fn snr_db(&self, frequency_hz: f64, bandwidth_hz: f64) -> Option<f64> {
        let center = self.bin_for_frequency(frequency_hz)?;
        let band_bins = ((bandwidth_hz / self.bin_width_hz) as usize).max(1);
        let start = center.saturating_sub(band_bins / 2);
        let end = (center + band_bins / 2 + 1).min(self.len());

        let signal = self.power_dbm[start..end].iter().copied().reduce(f64::max)?;

        let noise: Vec<f64> = self.power_dbm[..start]
            .iter()
            .chain(&self.power_dbm[end..])
            .copied()
            .collect();
        if noise.is_empty() {
            return None;
        }
        let noise_mean = noise.iter().sum::<f64>() / noise.len() as f64;
        Some(signal - noise_mean)
    }
}
