//! Test helpers: synthetic I/Q signals and scratch capture files
#![allow(dead_code)]

use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Complex tone at `frequency` Hz as interleaved cu8 bytes
pub fn generate_sine_wave_cu8(frequency: f32, sample_rate: u32, num_samples: usize) -> Vec<u8> {
    let angular_freq = 2.0 * PI * frequency / sample_rate as f32;
    let mut buffer = Vec::with_capacity(num_samples * 2);
    for n in 0..num_samples {
        let phase = angular_freq * n as f32;
        // [-1, 1] -> [0, 255]
        buffer.push(((phase.cos() + 1.0) * 127.5) as u8);
        buffer.push(((phase.sin() + 1.0) * 127.5) as u8);
    }
    buffer
}

/// Complex tone as interleaved little-endian cs16
pub fn generate_sine_wave_cs16(frequency: f32, sample_rate: u32, num_samples: usize) -> Vec<u8> {
    let angular_freq = 2.0 * PI * frequency / sample_rate as f32;
    let mut buffer = Vec::with_capacity(num_samples * 4);
    for n in 0..num_samples {
        let phase = angular_freq * n as f32;
        buffer.extend_from_slice(&((phase.cos() * 32767.0) as i16).to_le_bytes());
        buffer.extend_from_slice(&((phase.sin() * 32767.0) as i16).to_le_bytes());
    }
    buffer
}

/// Complex tone as interleaved little-endian cf32
pub fn generate_sine_wave_cf32(frequency: f32, sample_rate: u32, num_samples: usize) -> Vec<u8> {
    let angular_freq = 2.0 * PI * frequency / sample_rate as f32;
    let mut buffer = Vec::with_capacity(num_samples * 8);
    for n in 0..num_samples {
        let phase = angular_freq * n as f32;
        buffer.extend_from_slice(&phase.cos().to_le_bytes());
        buffer.extend_from_slice(&phase.sin().to_le_bytes());
    }
    buffer
}

/// Constant cu8 signal; `0.0` is the converter's midpoint
pub fn generate_dc_signal_cu8(num_samples: usize, i_value: f32, q_value: f32) -> Vec<u8> {
    let i_byte = ((i_value + 1.0) * 127.5).clamp(0.0, 255.0) as u8;
    let q_byte = ((q_value + 1.0) * 127.5).clamp(0.0, 255.0) as u8;
    [i_byte, q_byte].repeat(num_samples)
}

/// A block whose every byte is `tag`, so a delivered buffer can be traced
/// back to the completion that filled it
pub fn tagged_block(tag: u8, len: usize) -> Vec<u8> {
    vec![tag; len]
}

/// Write `bytes` to a fresh file in the temp directory
pub fn write_capture(name: &str, bytes: &[u8]) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!(
        "rtlstream-{}-{}-{}",
        std::process::id(),
        unique,
        name
    ));
    std::fs::write(&path, bytes).expect("Failed to write test capture");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_sine_wave_cu8_length() {
        let samples = generate_sine_wave_cu8(1000.0, 96000, 100);
        assert_eq!(samples.len(), 200);
    }

    #[test]
    fn test_generate_sine_wave_cu8_center() {
        // cos(0) = 1, sin(0) = 0
        let samples = generate_sine_wave_cu8(0.0, 96000, 10);
        for pair in samples.chunks_exact(2) {
            assert_eq!(pair[0], 255);
            assert!((pair[1] as i16 - 127).abs() <= 1);
        }
    }

    #[test]
    fn test_generate_dc_signal_cu8() {
        let samples = generate_dc_signal_cu8(50, 0.0, 0.0);
        assert_eq!(samples.len(), 100);
        assert!(samples.iter().all(|&b| b == 127));
    }

    #[test]
    fn test_write_capture_is_unique() {
        let a = write_capture("a.cu8", &[1, 2]);
        let b = write_capture("a.cu8", &[3, 4]);
        assert_ne!(a, b);
        std::fs::remove_file(a).ok();
        std::fs::remove_file(b).ok();
    }
}
