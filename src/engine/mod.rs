pub mod config;
pub mod controller;
pub mod fanout;
pub mod state;

pub use config::{AcquisitionConfig, PipelineConfig};
pub use controller::{PipelineController, RunSummary, StopReason};
pub use fanout::{EventFilter, PipelineEvent, SubscriberStats, Subscription, TrackSnapshot};
pub use state::PipelineState;
