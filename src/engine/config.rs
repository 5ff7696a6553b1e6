use crate::analysis::alerts::validate_rules;
use crate::analysis::{AlertRule, TrackerConfig};
use crate::buffers::WaterfallConfig;
use crate::dsp::SpectralConfig;
use crate::error::ConfigError;
use crate::hal::SourceCapabilities;
use crate::resilience::{ErrorPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// How the acquisition task talks to its source and its subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Upper bound on one `next_block` wait
    pub source_timeout_ms: u64,
    pub retry: RetryPolicy,
    pub processing_error_policy: ErrorPolicy,
    /// Queue length for subscribers that do not pick their own
    pub subscriber_capacity: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: 500,
            retry: RetryPolicy::default(),
            processing_error_policy: ErrorPolicy::SkipBlock,
            subscriber_capacity: 64,
        }
    }
}

impl AcquisitionConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_timeout_ms == 0 {
            return Err(ConfigError::out_of_range(
                "acquisition.source_timeout_ms",
                0.0,
                "at least 1",
            ));
        }
        if self.subscriber_capacity == 0 {
            return Err(ConfigError::out_of_range(
                "acquisition.subscriber_capacity",
                0.0,
                "at least 1",
            ));
        }
        if let RetryPolicy::Exponential { base_ms, max_ms, .. } = self.retry {
            if base_ms == 0 || max_ms < base_ms {
                return Err(ConfigError::out_of_range(
                    "acquisition.retry.max_ms",
                    max_ms as f64,
                    "at least base_ms, with base_ms positive",
                ));
            }
        }
        Ok(())
    }
}

/// Everything needed to build a PipelineController. Immutable once the
/// controller exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub spectrum: SpectralConfig,
    pub tracker: TrackerConfig,
    pub alert_rules: Vec<AlertRule>,
    pub waterfall: WaterfallConfig,
    pub acquisition: AcquisitionConfig,
}

impl PipelineConfig {
    /// Parse and validate a JSON configuration. Missing sections take defaults.
    pub fn from_json(config: Value) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_value(config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.spectrum.validate()?;
        self.tracker.validate()?;
        self.waterfall.validate()?;
        self.acquisition.validate()?;
        validate_rules(&self.alert_rules, self.spectrum.power_floor_dbm)
    }

    /// Reject a source whose blocks this configuration cannot process
    pub fn check_source(&self, capabilities: &SourceCapabilities) -> Result<(), ConfigError> {
        let source = &capabilities.config;
        if source.block_size != self.spectrum.block_size {
            return Err(ConfigError::SourceMismatch {
                field: "block_size",
                expected: self.spectrum.block_size as f64,
                actual: source.block_size as f64,
            });
        }

        let rate_error = (source.sample_rate_hz - self.spectrum.sample_rate_hz).abs();
        if rate_error > self.spectrum.sample_rate_hz * 1e-9 {
            return Err(ConfigError::SourceMismatch {
                field: "sample_rate_hz",
                expected: self.spectrum.sample_rate_hz,
                actual: source.sample_rate_hz,
            });
        }

        if (source.center_frequency_hz - self.spectrum.center_frequency_hz).abs() > 1e-3 {
            log::warn!(
                "Source '{}' is tuned to {} Hz, frequency axis uses {} Hz",
                capabilities.name,
                source.center_frequency_hz,
                self.spectrum.center_frequency_hz
            );
        }
        Ok(())
    }
}
