#![doc = include_str!("../readme.md")]

use num_complex::Complex;
use serde::{Deserialize, Serialize};

pub mod buffer;
pub mod capabilities;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod pool;
pub mod registry;
pub mod replay;
#[cfg(feature = "rtlsdr")]
pub mod rtlsdr;
pub mod session;
pub mod sim;
pub mod stream;
pub mod transport;

pub use buffer::SampleBuffer;
pub use capabilities::{Capabilities, TunerType};
pub use config::{StreamConfig, TunerConfig};
pub use device::{DeviceHandle, TunerSettings};
pub use engine::{StreamReader, StreamState, StreamStats, StreamingEngine};
pub use error::{Error, Result};
pub use registry::{DeviceInfo, DeviceRegistry, DeviceSelector};
pub use session::{Session, SessionState};
pub use stream::SampleStream;
pub use transport::{Completion, CompletionSender, Driver, TransferStatus, Transport};

/**
 * Tuner gain setting
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gain {
    /// Tuner-controlled gain
    #[default]
    Auto,
    /// Manual gain in tenths of dB (librtlsdr units)
    Manual(i32),
}

impl Gain {
    /// Manual gain from a value in dB
    pub fn from_db(db: f64) -> Self {
        Gain::Manual((db * 10.0).round() as i32)
    }

    /// Gain in dB, `None` for automatic gain
    pub fn db(self) -> Option<f64> {
        match self {
            Gain::Auto => None,
            Gain::Manual(tenths) => Some(f64::from(tenths) / 10.0),
        }
    }
}

impl std::fmt::Display for Gain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gain::Auto => write!(f, "auto"),
            Gain::Manual(tenths) => write!(f, "{:.1} dB", f64::from(*tenths) / 10.0),
        }
    }
}

/**
 * I/Q Data Format
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IqFormat {
    /// Complex unsigned 8-bit (Cu8), the native RTL2832U output
    #[default]
    Cu8,
    /// Complex signed 8-bit (Cs8)
    Cs8,
    /// Complex signed 16-bit (Cs16)
    Cs16,
    /// Complex 32-bit float (Cf32)
    Cf32,
}

impl IqFormat {
    /// Bytes used by one I/Q pair
    pub fn bytes_per_sample(self) -> usize {
        match self {
            IqFormat::Cu8 | IqFormat::Cs8 => 2,
            IqFormat::Cs16 => 4,
            IqFormat::Cf32 => 8,
        }
    }

    /// One I/Q pair; `pair` is exactly `bytes_per_sample` long
    fn decode(self, pair: &[u8]) -> Complex<f32> {
        let (i, q) = pair.split_at(pair.len() / 2);
        match self {
            IqFormat::Cu8 => {
                Complex::new((i[0] as f32 - 127.5) / 128.0, (q[0] as f32 - 127.5) / 128.0)
            }
            IqFormat::Cs8 => Complex::new(i[0] as i8 as f32 / 128.0, q[0] as i8 as f32 / 128.0),
            IqFormat::Cs16 => Complex::new(
                i16::from_le_bytes([i[0], i[1]]) as f32 / 32768.0,
                i16::from_le_bytes([q[0], q[1]]) as f32 / 32768.0,
            ),
            IqFormat::Cf32 => Complex::new(
                f32::from_le_bytes([i[0], i[1], i[2], i[3]]),
                f32::from_le_bytes([q[0], q[1], q[2], q[3]]),
            ),
        }
    }
}

impl std::str::FromStr for IqFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cu8" => Ok(IqFormat::Cu8),
            "cs8" => Ok(IqFormat::Cs8),
            "cs16" => Ok(IqFormat::Cs16),
            "cf32" => Ok(IqFormat::Cf32),
            other => Err(Error::invalid_parameter(
                "I/Q format",
                other,
                "cu8, cs8, cs16, cf32",
            )),
        }
    }
}

/// Decode interleaved I/Q bytes into complex samples in roughly [-1, 1).
///
/// cu8 is offset binary centred on 127.5, so both 0 and 255 land just
/// inside the unit range; signed formats are scaled by their full-scale
/// value. A trailing partial sample is ignored.
pub fn convert_bytes_to_complex(format: IqFormat, buffer: &[u8]) -> Vec<Complex<f32>> {
    buffer
        .chunks_exact(format.bytes_per_sample())
        .map(|pair| format.decode(pair))
        .collect()
}

/// Quantize normalized complex samples to the dongle's cu8 layout
pub fn convert_complex_to_cu8(samples: &[Complex<f32>], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for s in samples {
        out.push((s.re * 128.0 + 127.5).round().clamp(0.0, 255.0) as u8);
        out.push((s.im * 128.0 + 127.5).round().clamp(0.0, 255.0) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_display() {
        assert_eq!(Gain::Auto.to_string(), "auto");
        assert_eq!(Gain::Manual(496).to_string(), "49.6 dB");
        assert_eq!(Gain::from_db(19.7), Gain::Manual(197));
        assert_eq!(Gain::Manual(-10).db(), Some(-1.0));
    }

    #[test]
    fn test_iq_format_from_str() {
        assert_eq!("CU8".parse::<IqFormat>().unwrap(), IqFormat::Cu8);
        assert_eq!("cf32".parse::<IqFormat>().unwrap(), IqFormat::Cf32);
        assert!("u16".parse::<IqFormat>().is_err());
    }

    #[test]
    fn test_cu8_quantization_round_trip() {
        let bytes = [0u8, 255, 127, 128, 64, 200];
        let samples = convert_bytes_to_complex(IqFormat::Cu8, &bytes);
        let mut back = Vec::new();
        convert_complex_to_cu8(&samples, &mut back);
        assert_eq!(back, bytes);
    }

    #[test]
    fn test_cu8_range_and_partial_sample() {
        let samples = convert_bytes_to_complex(IqFormat::Cu8, &[0, 255, 7]);
        assert_eq!(samples.len(), 1);
        assert!((samples[0].re + 127.5 / 128.0).abs() < 1e-6);
        assert!((samples[0].im - 127.5 / 128.0).abs() < 1e-6);
        assert!(samples[0].norm() < 2f32.sqrt());
    }

    #[test]
    fn test_cs16_decodes_little_endian_halves() {
        let mut bytes = Vec::new();
        bytes.extend(16384i16.to_le_bytes());
        bytes.extend((-32768i16).to_le_bytes());
        let samples = convert_bytes_to_complex(IqFormat::Cs16, &bytes);
        assert_eq!(samples, vec![Complex::new(0.5, -1.0)]);
    }
}
