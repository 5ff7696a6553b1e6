use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::str::FromStr;

/// Window applied to each sample block before the transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowFunction {
    Rectangular,
    #[default]
    Hann,
    Hamming,
    Blackman,
    BlackmanHarris,
    FlatTop,
}

impl WindowFunction {
    /// Periodic window coefficients of length `size`
    pub fn coefficients(&self, size: usize) -> Vec<f64> {
        let phase = |i: usize, harmonic: f64| (harmonic * 2.0 * PI * i as f64 / size as f64).cos();

        (0..size)
            .map(|i| match self {
                Self::Rectangular => 1.0,
                Self::Hann => 0.5 - 0.5 * phase(i, 1.0),
                Self::Hamming => 0.54 - 0.46 * phase(i, 1.0),
                Self::Blackman => 0.42 - 0.5 * phase(i, 1.0) + 0.08 * phase(i, 2.0),
                Self::BlackmanHarris => {
                    0.35875 - 0.48829 * phase(i, 1.0) + 0.14128 * phase(i, 2.0)
                        - 0.01168 * phase(i, 3.0)
                }
                Self::FlatTop => {
                    0.21557895 - 0.41663158 * phase(i, 1.0) + 0.277263158 * phase(i, 2.0)
                        - 0.083578947 * phase(i, 3.0)
                        + 0.006947368 * phase(i, 4.0)
                }
            })
            .collect()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rectangular => "rectangular",
            Self::Hann => "hann",
            Self::Hamming => "hamming",
            Self::Blackman => "blackman",
            Self::BlackmanHarris => "blackman-harris",
            Self::FlatTop => "flat-top",
        }
    }
}

impl FromStr for WindowFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rectangular" | "rect" | "none" => Ok(Self::Rectangular),
            "hann" | "hanning" => Ok(Self::Hann),
            "hamming" => Ok(Self::Hamming),
            "blackman" => Ok(Self::Blackman),
            "blackman-harris" | "blackmanharris" => Ok(Self::BlackmanHarris),
            "flat-top" | "flattop" => Ok(Self::FlatTop),
            other => Err(format!("unknown window function: {}", other)),
        }
    }
}
