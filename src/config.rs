//! Stream and tuner configuration.
//!
//! Both structs derive `serde` with `#[serde(default)]`, so a partial
//! document (JSON, TOML, ...) only overrides what it names.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Gain;
use crate::error::{Error, Result};

/// USB bulk packet size; buffer sizes must be a multiple of it.
pub const BULK_PACKET_SIZE: usize = 512;

/// librtlsdr default transfer length (16 × 16384 bytes)
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 16384;

/// librtlsdr default number of transfers
pub const DEFAULT_BUFFER_COUNT: usize = 15;

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Frequency the device is reset to on open
pub const DEFAULT_CENTER_FREQ: u32 = 980_000_000;

pub const DEFAULT_SAMPLE_RATE: u32 = 2_048_000;

/**
 * Buffer pool sizing and streaming timeouts
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bytes per transfer
    pub buffer_size: usize,
    /// Number of transfers kept in the pool
    pub buffer_count: usize,
    /// Upper bound for `Session::read`; `None` blocks indefinitely
    #[serde(with = "millis_opt")]
    pub read_timeout: Option<Duration>,
    /// Grace period for in-flight transfers during `stop`
    #[serde(with = "millis")]
    pub drain_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            buffer_count: DEFAULT_BUFFER_COUNT,
            read_timeout: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl StreamConfig {
    pub fn new(buffer_size: usize, buffer_count: usize) -> Self {
        Self {
            buffer_size,
            buffer_count,
            ..Self::default()
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 || self.buffer_size % BULK_PACKET_SIZE != 0 {
            return Err(Error::invalid_parameter(
                "buffer size",
                self.buffer_size,
                format!("non-zero multiple of {} bytes", BULK_PACKET_SIZE),
            ));
        }
        if self.buffer_count == 0 {
            return Err(Error::invalid_parameter(
                "buffer count",
                self.buffer_count,
                "at least 1",
            ));
        }
        Ok(())
    }
}

/**
 * Tuner settings to apply to an open device
 *
 * Unset fields are left as they are.
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Center frequency in Hz
    pub center_freq: Option<u32>,
    /// Sample rate in Hz
    pub sample_rate: Option<u32>,
    pub gain: Option<Gain>,
    /// IF bandwidth in Hz, 0 for automatic
    pub bandwidth: Option<u32>,
    /// Crystal correction in ppm
    pub freq_correction: Option<i32>,
    /// RTL2832U digital AGC
    pub agc: Option<bool>,
    pub bias_tee: Option<bool>,
}

impl TunerConfig {
    /// State a device is reset to when opened
    pub fn factory() -> Self {
        Self {
            center_freq: Some(DEFAULT_CENTER_FREQ),
            sample_rate: Some(DEFAULT_SAMPLE_RATE),
            gain: Some(Gain::Auto),
            bandwidth: Some(0),
            freq_correction: Some(0),
            agc: Some(true),
            bias_tee: Some(false),
        }
    }

    pub fn center_freq(mut self, hz: u32) -> Self {
        self.center_freq = Some(hz);
        self
    }

    pub fn sample_rate(mut self, hz: u32) -> Self {
        self.sample_rate = Some(hz);
        self
    }

    pub fn gain(mut self, gain: Gain) -> Self {
        self.gain = Some(gain);
        self
    }

    pub fn bandwidth(mut self, hz: u32) -> Self {
        self.bandwidth = Some(hz);
        self
    }

    pub fn freq_correction(mut self, ppm: i32) -> Self {
        self.freq_correction = Some(ppm);
        self
    }

    pub fn agc(mut self, enabled: bool) -> Self {
        self.agc = Some(enabled);
        self
    }

    pub fn bias_tee(mut self, enabled: bool) -> Self {
        self.bias_tee = Some(enabled);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod millis_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stream_config_is_valid() {
        let config = StreamConfig::default();
        assert_eq!(config.buffer_size, 262_144);
        assert_eq!(config.buffer_count, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_buffer_size_must_be_packet_multiple() {
        assert!(StreamConfig::new(16384, 4).validate().is_ok());
        assert!(matches!(
            StreamConfig::new(1000, 4).validate(),
            Err(Error::InvalidParameter { parameter: "buffer size", .. })
        ));
        assert!(StreamConfig::new(0, 4).validate().is_err());
    }

    #[test]
    fn test_buffer_count_must_be_positive() {
        assert!(matches!(
            StreamConfig::new(512, 0).validate(),
            Err(Error::InvalidParameter { parameter: "buffer count", .. })
        ));
    }

    #[test]
    fn test_factory_sets_every_field() {
        let factory = TunerConfig::factory();
        assert_eq!(factory.center_freq, Some(980_000_000));
        assert_eq!(factory.gain, Some(Gain::Auto));
        assert_eq!(factory.agc, Some(true));
        assert!(TunerConfig::default().is_empty());
        assert!(!factory.is_empty());
    }

    #[test]
    fn test_builder() {
        let config = TunerConfig::default()
            .center_freq(1_090_000_000)
            .gain(Gain::Manual(496));
        assert_eq!(config.center_freq, Some(1_090_000_000));
        assert_eq!(config.gain, Some(Gain::Manual(496)));
        assert_eq!(config.sample_rate, None);
    }
}
