pub mod file_replay;
pub mod live;

pub use file_replay::FileReplay;
pub use live::{Link, LinkConnector, LiveDevice};
