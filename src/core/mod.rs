pub mod sample_block;
pub mod spectrum_frame;

pub use sample_block::{IqSample, SampleBlock};
pub use spectrum_frame::SpectrumFrame;
