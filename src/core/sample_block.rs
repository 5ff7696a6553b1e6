use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Baseband I/Q sample, normalised to ±1.0 full scale
pub type IqSample = Complex<f64>;

/// Fixed-length block of complex samples handed from a source to the processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleBlock {
    /// Monotonic block number; jumps forward when the device dropped samples
    pub sequence: u64,

    /// Capture timestamp in microseconds since the start of the stream
    pub timestamp_us: u64,

    pub samples: Vec<IqSample>,

    /// Set when samples were lost between the previous block and this one
    pub gap_flag: bool,
}

impl SampleBlock {
    pub fn new(sequence: u64, timestamp_us: u64, samples: Vec<IqSample>) -> Self {
        Self {
            sequence,
            timestamp_us,
            samples,
            gap_flag: false,
        }
    }

    pub fn with_gap(mut self, gap: bool) -> Self {
        self.gap_flag = gap;
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Capture timestamp for the first sample of block `sequence`
pub fn block_timestamp_us(sequence: u64, block_size: usize, sample_rate_hz: f64) -> u64 {
    let samples_elapsed = sequence as f64 * block_size as f64;
    (samples_elapsed * 1_000_000.0 / sample_rate_hz) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_timestamp_from_sequence() {
        // 1024 samples at 1.024 MHz is exactly 1 ms per block
        assert_eq!(block_timestamp_us(0, 1024, 1_024_000.0), 0);
        assert_eq!(block_timestamp_us(3, 1024, 1_024_000.0), 3_000);
    }

    #[test]
    fn test_gap_flag_defaults_off() {
        let block = SampleBlock::new(7, 100, vec![IqSample::new(0.0, 0.0); 4]);
        assert!(!block.gap_flag);
        assert!(block.with_gap(true).gap_flag);
    }
}
