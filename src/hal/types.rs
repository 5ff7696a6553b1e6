use crate::core::SampleBlock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Which kind of link a source stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    LiveDevice,
    FileReplay,
    SyntheticGenerator,
}

/// Tuning applied to a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub center_frequency_hz: f64,
    pub sample_rate_hz: f64,
    pub gain_db: f64,
    pub block_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            center_frequency_hz: 100_000_000.0,
            sample_rate_hz: 2_400_000.0,
            gain_db: 40.0,
            block_size: 1024,
        }
    }
}

impl SourceConfig {
    /// Wall-clock duration of one block
    pub fn block_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.block_size as f64 / self.sample_rate_hz)
    }
}

/// Device-capability metadata the pipeline checks its configuration against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCapabilities {
    pub kind: SourceKind,
    pub name: String,
    pub config: SourceConfig,
    pub format: Option<IqFormat>,
}

/// Raw interleaved I/Q encodings found on SDR links and recordings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IqFormat {
    /// Unsigned 8-bit, offset binary (RTL-SDR)
    Cu8,
    /// Signed 8-bit (HackRF)
    Cs8,
    /// Signed 16-bit little-endian (PlutoSDR)
    Cs16,
    /// 32-bit float little-endian
    Cf32,
}

impl IqFormat {
    /// Bytes per complex sample
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Cu8 | Self::Cs8 => 2,
            Self::Cs16 => 4,
            Self::Cf32 => 8,
        }
    }

    /// Guess the format from a recording's extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        match extension.as_str() {
            "cu8" | "bin" => Some(Self::Cu8),
            "cs8" => Some(Self::Cs8),
            "cs16" | "sc16" => Some(Self::Cs16),
            "cf32" | "cfile" | "iq" | "fc32" => Some(Self::Cf32),
            _ => None,
        }
    }
}

impl FromStr for IqFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cu8" => Ok(Self::Cu8),
            "cs8" => Ok(Self::Cs8),
            "cs16" => Ok(Self::Cs16),
            "cf32" => Ok(Self::Cf32),
            other => Err(format!("unknown I/Q format: {}", other)),
        }
    }
}

/// Result of one `next_block` call
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Block(SampleBlock),
    /// Nothing arrived before the timeout
    Empty,
    /// A finite source ran out of samples
    EndOfStream,
    /// The link is gone and will not come back without reopening
    Disconnected(String),
}

/// Lifecycle of a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceState {
    Unopened,
    Open,
    Closed,
    Error(String),
}
