pub mod alerts;
pub mod peaks;

pub use alerts::{AlertEngine, AlertEvent, AlertRule, Severity, TriggerMode};
pub use peaks::{PeakCandidate, PeakTrack, PeakTracker, TrackId, TrackPoint, TrackerConfig};
