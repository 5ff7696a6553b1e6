pub mod analysis;
pub mod buffers;
pub mod core;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod hal;
pub mod observability;
pub mod resilience;

pub use engine::{EventFilter, PipelineConfig, PipelineController, PipelineEvent, PipelineState};
pub use error::{ConfigError, PipelineError};
