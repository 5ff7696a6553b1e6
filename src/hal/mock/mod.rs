pub mod synthetic;

pub use synthetic::{InjectedFault, ScheduledFault, SyntheticGenerator, SyntheticScript, ToneSpec};
