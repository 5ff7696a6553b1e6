use crate::core::IqSample;
use crate::hal::types::IqFormat;
use anyhow::{bail, Result};

/// Decode interleaved I/Q bytes into normalized complex samples.
///
/// Integer formats map to roughly [-1, 1). A trailing partial sample is an error.
pub fn bytes_to_iq(bytes: &[u8], format: IqFormat, out: &mut Vec<IqSample>) -> Result<()> {
    let stride = format.bytes_per_sample();
    if bytes.len() % stride != 0 {
        bail!(
            "{} bytes is not a whole number of {:?} samples ({} bytes each)",
            bytes.len(),
            format,
            stride
        );
    }

    out.reserve(bytes.len() / stride);
    for chunk in bytes.chunks_exact(stride) {
        let sample = match format {
            IqFormat::Cu8 => IqSample::new(
                (chunk[0] as f64 - 128.0) / 128.0,
                (chunk[1] as f64 - 128.0) / 128.0,
            ),
            IqFormat::Cs8 => IqSample::new(
                chunk[0] as i8 as f64 / 128.0,
                chunk[1] as i8 as f64 / 128.0,
            ),
            IqFormat::Cs16 => IqSample::new(
                i16::from_le_bytes([chunk[0], chunk[1]]) as f64 / 32768.0,
                i16::from_le_bytes([chunk[2], chunk[3]]) as f64 / 32768.0,
            ),
            IqFormat::Cf32 => IqSample::new(
                f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
                f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]) as f64,
            ),
        };
        out.push(sample);
    }
    Ok(())
}

/// Encode samples back to a raw format, clamping integer encodings
pub fn iq_to_bytes(samples: &[IqSample], format: IqFormat) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * format.bytes_per_sample());
    for sample in samples {
        for value in [sample.re, sample.im] {
            match format {
                IqFormat::Cu8 => {
                    bytes.push((value * 128.0 + 128.0).round().clamp(0.0, 255.0) as u8);
                }
                IqFormat::Cs8 => {
                    bytes.push((value * 128.0).round().clamp(-128.0, 127.0) as i8 as u8);
                }
                IqFormat::Cs16 => {
                    let v = (value * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
                    bytes.extend_from_slice(&v.to_le_bytes());
                }
                IqFormat::Cf32 => bytes.extend_from_slice(&(value as f32).to_le_bytes()),
            }
        }
    }
    bytes
}
