pub mod collector;
pub mod metrics;
pub mod monitor;

pub use collector::{MetricsCollector, StageSnapshot};
pub use metrics::{CounterSnapshot, PipelineCounters, StageMetrics};
pub use monitor::PipelineMonitor;
