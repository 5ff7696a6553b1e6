pub mod waterfall;

pub use waterfall::{TimeWindow, WaterfallBuffer, WaterfallConfig, WaterfallRow};
