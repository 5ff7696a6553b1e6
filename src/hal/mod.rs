pub mod drivers;
pub mod format_converter;
pub mod lifecycle;
pub mod mock;
pub mod traits;
pub mod types;

pub use drivers::{FileReplay, Link, LinkConnector, LiveDevice};
pub use lifecycle::ManagedSource;
pub use mock::{InjectedFault, SyntheticGenerator, SyntheticScript, ToneSpec};
pub use traits::SampleSource;
pub use types::{IqFormat, SourceCapabilities, SourceConfig, SourceEvent, SourceKind, SourceState};
