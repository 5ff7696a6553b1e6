//! Block-to-spectrum transform with exponential averaging and peak hold.

use crate::core::{IqSample, SampleBlock, SpectrumFrame};
use crate::dsp::WindowFunction;
use crate::error::{ConfigError, ProcessingError};
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    pub sample_rate_hz: f64,

    /// Tuned frequency. Bin 0 of the folded spectrum sits here and bin `k`
    /// is labelled `center + k * bin_width`, covering offsets of both signs.
    pub center_frequency_hz: f64,

    pub block_size: usize,
    pub window_function: WindowFunction,

    /// Weight of the newest block; 1.0 disables averaging
    pub averaging_alpha: f64,

    /// Added to 10·log10(power) to convert full-scale power into dBm
    pub calibration_db: f64,

    pub power_floor_dbm: f64,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 2_400_000.0,
            center_frequency_hz: 100_000_000.0,
            block_size: 1024,
            window_function: WindowFunction::Hann,
            averaging_alpha: 1.0,
            calibration_db: 0.0,
            power_floor_dbm: -150.0,
        }
    }
}

impl SpectralConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.block_size.is_power_of_two() || self.block_size < 8 {
            return Err(ConfigError::InvalidBlockSize(self.block_size));
        }
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return Err(ConfigError::out_of_range(
                "sample_rate_hz",
                self.sample_rate_hz,
                "a positive finite number",
            ));
        }
        if !(self.center_frequency_hz.is_finite() && self.center_frequency_hz >= 0.0) {
            return Err(ConfigError::out_of_range(
                "center_frequency_hz",
                self.center_frequency_hz,
                "a non-negative finite number",
            ));
        }
        if !(self.averaging_alpha > 0.0 && self.averaging_alpha <= 1.0) {
            return Err(ConfigError::out_of_range(
                "averaging_alpha",
                self.averaging_alpha,
                "in (0, 1]",
            ));
        }
        if !self.calibration_db.is_finite() {
            return Err(ConfigError::out_of_range(
                "calibration_db",
                self.calibration_db,
                "finite",
            ));
        }
        if !self.power_floor_dbm.is_finite() {
            return Err(ConfigError::out_of_range(
                "power_floor_dbm",
                self.power_floor_dbm,
                "finite",
            ));
        }
        Ok(())
    }

    /// Number of bins in every emitted frame
    pub fn frame_len(&self) -> usize {
        self.block_size / 2
    }

    pub fn bin_width_hz(&self) -> f64 {
        self.sample_rate_hz / self.block_size as f64
    }
}

pub struct SpectralProcessor {
    config: SpectralConfig,
    fft: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
    /// (Σw)², so a full-scale tone centred on a bin reads 0 dB before calibration
    window_norm: f64,
    scratch: Vec<IqSample>,
    averaged: Option<Vec<f64>>,
    averaging_count: u32,
    peak_hold: Option<Vec<f64>>,
}

impl SpectralProcessor {
    pub fn new(config: SpectralConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.block_size);
        let window = config.window_function.coefficients(config.block_size);
        let window_sum: f64 = window.iter().sum();

        Ok(Self {
            scratch: vec![IqSample::new(0.0, 0.0); config.block_size],
            window_norm: window_sum * window_sum,
            window,
            fft,
            averaged: None,
            averaging_count: 0,
            peak_hold: None,
            config,
        })
    }

    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }

    /// Transform one block into a frame, folding it into the running average.
    ///
    /// Gap-flagged blocks still yield a frame (tagged `degraded`) but are kept
    /// out of the accumulator and the peak hold.
    pub fn process(&mut self, block: &SampleBlock) -> Result<SpectrumFrame, ProcessingError> {
        let n = self.config.block_size;
        if block.len() != n {
            return Err(ProcessingError::BlockSizeMismatch {
                expected: n,
                actual: block.len(),
            });
        }

        // Apply window function
        for (i, (sample, w)) in block.samples.iter().zip(&self.window).enumerate() {
            if !(sample.re.is_finite() && sample.im.is_finite()) {
                return Err(ProcessingError::NonFiniteSample { index: i });
            }
            self.scratch[i] = *sample * *w;
        }

        self.fft.process(&mut self.scratch);

        // Fold bin N-k onto bin k
        let half = n / 2;
        let fresh: Vec<f64> = (0..half)
            .map(|k| {
                let mut power = self.scratch[k].norm_sqr();
                if k > 0 {
                    power += self.scratch[n - k].norm_sqr();
                }
                self.to_dbm(power)
            })
            .collect();

        let alpha = self.config.averaging_alpha;
        let power_dbm = match &self.averaged {
            Some(previous) if alpha < 1.0 => fresh
                .iter()
                .zip(previous)
                .map(|(new, old)| alpha * new + (1.0 - alpha) * old)
                .collect(),
            _ => fresh,
        };

        let averaging_count = if alpha < 1.0 {
            self.averaging_count.saturating_add(1)
        } else {
            1
        };

        if !block.gap_flag {
            self.averaging_count = averaging_count;
            self.update_peak_hold(&power_dbm);
            self.averaged = Some(power_dbm.clone());
        }

        let bin_width_hz = self.config.bin_width_hz();
        Ok(SpectrumFrame {
            sequence: block.sequence,
            timestamp_us: block.timestamp_us,
            center_frequency_hz: self.config.center_frequency_hz,
            sample_rate_hz: self.config.sample_rate_hz,
            bin_width_hz,
            span_hz: bin_width_hz * (half - 1) as f64,
            power_dbm,
            averaging_count,
            degraded: block.gap_flag,
        })
    }

    fn to_dbm(&self, power: f64) -> f64 {
        let floor = self.config.power_floor_dbm;
        if power <= 0.0 {
            return floor;
        }
        let dbm = 10.0 * (power / self.window_norm).log10() + self.config.calibration_db;
        dbm.max(floor)
    }

    fn update_peak_hold(&mut self, power_dbm: &[f64]) {
        match &mut self.peak_hold {
            Some(hold) => {
                for (held, &p) in hold.iter_mut().zip(power_dbm) {
                    *held = held.max(p);
                }
            }
            None => self.peak_hold = Some(power_dbm.to_vec()),
        }
    }

    /// Bin-wise maximum of every non-degraded frame since the last reset
    pub fn peak_hold(&self) -> Option<&[f64]> {
        self.peak_hold.as_deref()
    }

    pub fn reset_averaging(&mut self) {
        self.averaged = None;
        self.averaging_count = 0;
    }

    pub fn reset_peak_hold(&mut self) {
        self.peak_hold = None;
    }
}
