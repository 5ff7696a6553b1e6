pub mod spectral;
pub mod window;

pub use spectral::{SpectralConfig, SpectralProcessor};
pub use window::WindowFunction;
