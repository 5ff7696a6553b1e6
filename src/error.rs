use thiserror::Error;

/// Rejected configuration. These are the only errors that prevent startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("block_size must be a power of two and at least 8, got {0}")]
    InvalidBlockSize(usize),

    #[error("{name} must be {expected}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("alert rule '{rule_id}': {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("duplicate alert rule id '{0}'")]
    DuplicateRule(String),

    #[error("source reports {field} = {actual}, pipeline is configured for {expected}")]
    SourceMismatch {
        field: &'static str,
        expected: f64,
        actual: f64,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn out_of_range(name: &'static str, value: f64, expected: &'static str) -> Self {
        Self::OutOfRange {
            name,
            value,
            expected,
        }
    }
}

/// Failure while turning one sample block into a spectrum frame
#[derive(Debug, Error, PartialEq)]
pub enum ProcessingError {
    #[error("block has {actual} samples, processor expects {expected}")]
    BlockSizeMismatch { expected: usize, actual: usize },

    #[error("non-finite sample at index {index}")]
    NonFiniteSample { index: usize },
}

#[derive(Debug, Error, PartialEq)]
pub enum WaterfallError {
    #[error("frame has {actual} bins, waterfall rows are {expected} wide")]
    WidthMismatch { expected: usize, actual: usize },

    #[error("frame timestamp {timestamp_us}us is not after newest row {newest_us}us")]
    OutOfOrder { timestamp_us: u64, newest_us: u64 },
}

/// Errors surfaced by the pipeline controller
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("failed to open sample source: {0}")]
    SourceOpen(String),

    #[error("sample source disconnected: {0}")]
    DeviceLost(String),

    #[error("sample source produced nothing after {attempts} attempts")]
    SourceTimeout { attempts: u32 },

    #[error("sample source read failed {attempts} times in a row: {reason}")]
    SourceRead { attempts: u32, reason: String },

    #[error("pipeline is {0}; stop it first")]
    Busy(String),

    #[error("block {sequence} failed to process: {source}")]
    Processing {
        sequence: u64,
        #[source]
        source: ProcessingError,
    },

    #[error("acquisition task ended abnormally: {0}")]
    TaskFailed(String),
}
