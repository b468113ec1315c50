//! Device capability descriptor.
//!
//! A [`Capabilities`] value is fetched once when a device is opened and all
//! parameter validation runs against it as pure functions. Every `snap_*`
//! method either rejects a request with [`Error::InvalidParameter`] or returns
//! the nearest value the hardware can actually produce, so callers always see
//! the value that was applied rather than the one they asked for.

use std::ops::RangeInclusive;

use crate::Gain;
use crate::error::{Error, Result};

/// Reference crystal of the RTL2832U on nearly every dongle.
pub const DEFAULT_RTL_XTAL_FREQ: u32 = 28_800_000;

// Gain tables in tenths of dB, as reported by librtlsdr for each tuner.
const E4K_GAINS: &[i32] = &[
    -10, 15, 40, 65, 90, 115, 140, 165, 190, 215, 240, 290, 340, 420,
];
const FC0012_GAINS: &[i32] = &[-99, -40, 71, 179, 192];
const FC0013_GAINS: &[i32] = &[
    -99, -73, -65, -63, -60, -58, -54, 58, 61, 63, 65, 67, 68, 70, 71, 179, 181, 182, 184, 186,
    188, 191, 197,
];
const FC2580_GAINS: &[i32] = &[0];
const R82XX_GAINS: &[i32] = &[
    0, 9, 14, 27, 37, 77, 87, 125, 144, 157, 166, 197, 207, 229, 254, 280, 297, 328, 338, 364, 372,
    386, 402, 421, 434, 439, 445, 480, 496,
];
const UNKNOWN_GAINS: &[i32] = &[0];

// R82xx IF filter settings in Hz.
const R82XX_BANDWIDTHS: &[u32] = &[
    350_000, 450_000, 550_000, 700_000, 900_000, 1_200_000, 1_450_000, 1_550_000, 1_600_000,
    1_700_000, 6_000_000, 7_000_000, 8_000_000,
];

/// Tuner chips found behind the RTL2832U.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TunerType {
    #[default]
    Unknown,
    E4000,
    Fc0012,
    Fc0013,
    Fc2580,
    R820T,
    R828D,
}

impl TunerType {
    /// Get a human-readable tuner name
    pub fn name(self) -> &'static str {
        match self {
            TunerType::Unknown => "Unknown",
            TunerType::E4000 => "Elonics E4000",
            TunerType::Fc0012 => "Fitipower FC0012",
            TunerType::Fc0013 => "Fitipower FC0013",
            TunerType::Fc2580 => "FCI FC2580",
            TunerType::R820T => "Rafael Micro R820T",
            TunerType::R828D => "Rafael Micro R828D",
        }
    }

    fn gains(self) -> &'static [i32] {
        match self {
            TunerType::E4000 => E4K_GAINS,
            TunerType::Fc0012 => FC0012_GAINS,
            TunerType::Fc0013 => FC0013_GAINS,
            TunerType::Fc2580 => FC2580_GAINS,
            TunerType::R820T | TunerType::R828D => R82XX_GAINS,
            TunerType::Unknown => UNKNOWN_GAINS,
        }
    }

    fn frequency_range(self) -> (u32, u32) {
        match self {
            TunerType::E4000 => (52_000_000, 2_200_000_000),
            TunerType::Fc0012 => (22_000_000, 948_600_000),
            TunerType::Fc0013 => (22_000_000, 1_100_000_000),
            TunerType::Fc2580 => (146_000_000, 924_000_000),
            TunerType::R820T | TunerType::R828D | TunerType::Unknown => {
                (24_000_000, 1_766_000_000)
            }
        }
    }
}

impl std::fmt::Display for TunerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Tunable frequency span and the PLL step inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyRange {
    pub min: u32,
    pub max: u32,
    pub step: u32,
}

/// What a device can do, fetched once at open.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    pub tuner: TunerType,
    pub frequency: FrequencyRange,
    /// Sample rates accepted by the RTL2832U resampler
    pub sample_rates: Vec<RangeInclusive<u32>>,
    pub rtl_xtal_freq: u32,
    pub tuner_xtal_freq: u32,
    /// Supported manual gains in tenths of dB, ascending
    pub gains: Vec<i32>,
    /// Selectable IF bandwidths in Hz, ascending; empty when only automatic
    /// bandwidth is available
    pub bandwidths: Vec<u32>,
    pub freq_correction: RangeInclusive<i32>,
    pub supports_agc: bool,
    pub supports_bias_tee: bool,
}

impl Capabilities {
    /// Capabilities of a stock RTL2832U paired with `tuner`.
    pub fn for_tuner(tuner: TunerType, rtl_xtal_freq: u32) -> Self {
        let (min, max) = tuner.frequency_range();
        let bandwidths = match tuner {
            TunerType::R820T | TunerType::R828D => R82XX_BANDWIDTHS.to_vec(),
            _ => Vec::new(),
        };

        Self {
            tuner,
            frequency: FrequencyRange { min, max, step: 1 },
            sample_rates: vec![225_001..=300_000, 900_001..=3_200_000],
            rtl_xtal_freq,
            tuner_xtal_freq: rtl_xtal_freq,
            gains: tuner.gains().to_vec(),
            bandwidths,
            freq_correction: -1000..=1000,
            supports_agc: true,
            supports_bias_tee: matches!(tuner, TunerType::R820T | TunerType::R828D),
        }
    }

    /// Validate a center frequency and round it to the nearest PLL step.
    pub fn snap_frequency(&self, hz: u32) -> Result<u32> {
        let FrequencyRange { min, max, step } = self.frequency;
        if hz < min || hz > max {
            return Err(Error::invalid_parameter(
                "frequency",
                hz,
                format!("{}..={} Hz", min, max),
            ));
        }

        let step = u64::from(step.max(1));
        let offset = u64::from(hz - min);
        let mut steps = (offset + step / 2) / step;
        if u64::from(min) + steps * step > u64::from(max) {
            steps -= 1;
        }
        // Bounded by max above, so the narrowing is lossless.
        Ok((u64::from(min) + steps * step) as u32)
    }

    /// Validate a sample rate and return the rate the RTL2832U resampler
    /// actually produces for it.
    ///
    /// The resampler divides `xtal * 2^22` by a ratio whose two low bits are
    /// forced to zero, so only every fourth ratio is reachable. The nearest
    /// of the two reachable rates bracketing the request wins.
    pub fn snap_sample_rate(&self, hz: u32) -> Result<u32> {
        if !self.sample_rate_in_range(hz) {
            return Err(Error::invalid_parameter(
                "sample rate",
                hz,
                self.describe_sample_rates(),
            ));
        }

        let base = u64::from(self.rtl_xtal_freq) << 22;
        let ratio = (base / u64::from(hz)) & !0x3;
        let above = resampled_rate(base, ratio);
        let below = resampled_rate(base, ratio + 4);

        let candidates = [above, below];
        candidates
            .iter()
            .copied()
            .filter(|&rate| self.sample_rate_in_range(rate))
            .min_by_key(|&rate| rate.abs_diff(hz))
            .ok_or_else(|| {
                Error::invalid_parameter("sample rate", hz, self.describe_sample_rates())
            })
    }

    /// Validate a gain setting and round manual gains to the nearest entry
    /// of the tuner's gain table (ties go to the lower gain).
    pub fn snap_gain(&self, gain: Gain) -> Result<Gain> {
        let Gain::Manual(tenths) = gain else {
            return Ok(Gain::Auto);
        };

        let (Some(&min), Some(&max)) = (self.gains.first(), self.gains.last()) else {
            return Err(Error::Unsupported("manual gain"));
        };
        if tenths < min || tenths > max {
            return Err(Error::invalid_parameter(
                "gain",
                gain,
                format!("{}..={} tenths of dB", min, max),
            ));
        }

        let nearest = self
            .gains
            .iter()
            .copied()
            .min_by_key(|&g| g.abs_diff(tenths))
            .unwrap_or(min);
        Ok(Gain::Manual(nearest))
    }

    /// Validate an IF bandwidth. `0` selects automatic bandwidth; any other
    /// value is rounded to the nearest filter setting (ties go to the wider
    /// filter).
    pub fn snap_bandwidth(&self, hz: u32) -> Result<u32> {
        if hz == 0 {
            return Ok(0);
        }

        let (Some(&min), Some(&max)) = (self.bandwidths.first(), self.bandwidths.last()) else {
            return Err(Error::invalid_parameter("bandwidth", hz, "0 (automatic only)"));
        };
        if hz < min || hz > max {
            return Err(Error::invalid_parameter(
                "bandwidth",
                hz,
                format!("0 or {}..={} Hz", min, max),
            ));
        }

        let nearest = self
            .bandwidths
            .iter()
            .rev()
            .copied()
            .min_by_key(|&bw| bw.abs_diff(hz))
            .unwrap_or(max);
        Ok(nearest)
    }

    /// Validate a frequency correction in ppm.
    pub fn check_freq_correction(&self, ppm: i32) -> Result<i32> {
        if !self.freq_correction.contains(&ppm) {
            return Err(Error::invalid_parameter(
                "frequency correction",
                ppm,
                format!(
                    "{}..={} ppm",
                    self.freq_correction.start(),
                    self.freq_correction.end()
                ),
            ));
        }
        Ok(ppm)
    }

    fn sample_rate_in_range(&self, hz: u32) -> bool {
        self.sample_rates.iter().any(|r| r.contains(&hz))
    }

    fn describe_sample_rates(&self) -> String {
        self.sample_rates
            .iter()
            .map(|r| format!("{}..={} Hz", r.start(), r.end()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::for_tuner(TunerType::R820T, DEFAULT_RTL_XTAL_FREQ)
    }
}

fn resampled_rate(base: u64, ratio: u64) -> u32 {
    u32::try_from(base / ratio.max(1)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r820t() -> Capabilities {
        Capabilities::default()
    }

    #[test]
    fn test_frequency_out_of_range() {
        let caps = r820t();
        assert!(matches!(
            caps.snap_frequency(10_000_000),
            Err(Error::InvalidParameter { parameter: "frequency", .. })
        ));
        assert!(caps.snap_frequency(1_800_000_000).is_err());
        assert_eq!(caps.snap_frequency(24_000_000).unwrap(), 24_000_000);
        assert_eq!(caps.snap_frequency(1_766_000_000).unwrap(), 1_766_000_000);
    }

    #[test]
    fn test_frequency_snaps_to_step() {
        let mut caps = r820t();
        caps.frequency.step = 1000;
        assert_eq!(caps.snap_frequency(100_000_499).unwrap(), 100_000_000);
        assert_eq!(caps.snap_frequency(100_000_500).unwrap(), 100_001_000);
        assert_eq!(caps.snap_frequency(100_000_999).unwrap(), 100_001_000);
    }

    #[test]
    fn test_frequency_snap_never_exceeds_max() {
        let caps = Capabilities {
            frequency: FrequencyRange {
                min: 1000,
                max: 2500,
                step: 1000,
            },
            ..r820t()
        };
        assert_eq!(caps.snap_frequency(2500).unwrap(), 2000);
    }

    #[test]
    fn test_frequency_snap_is_monotonic_and_adjacent() {
        let mut caps = r820t();
        caps.frequency.step = 4096;
        let mut previous = 0;
        for hz in (100_000_000..100_100_000).step_by(777) {
            let snapped = caps.snap_frequency(hz).unwrap();
            assert!(snapped >= previous);
            assert!(snapped.abs_diff(hz) <= 2048);
            previous = snapped;
        }
    }

    #[test]
    fn test_sample_rate_gaps_rejected() {
        let caps = r820t();
        assert!(caps.snap_sample_rate(225_000).is_err());
        assert!(caps.snap_sample_rate(500_000).is_err());
        assert!(caps.snap_sample_rate(900_000).is_err());
        assert!(caps.snap_sample_rate(3_200_001).is_err());
    }

    #[test]
    fn test_common_sample_rates_are_exact() {
        let caps = r820t();
        for rate in [1_024_000, 2_048_000, 2_400_000, 3_200_000] {
            assert_eq!(caps.snap_sample_rate(rate).unwrap(), rate);
        }
    }

    #[test]
    fn test_sample_rate_snap_is_nearest_reachable() {
        let caps = r820t();
        let requested = 1_800_000;
        let actual = caps.snap_sample_rate(requested).unwrap();

        let base = u64::from(DEFAULT_RTL_XTAL_FREQ) << 22;
        let ratio = (base / u64::from(requested)) & !0x3;
        let above = (base / ratio) as u32;
        let below = (base / (ratio + 4)) as u32;
        assert!(below <= requested && requested <= above);
        assert!(actual == above || actual == below);
        assert!(actual.abs_diff(requested) <= above.abs_diff(requested));
        assert!(actual.abs_diff(requested) <= below.abs_diff(requested));
    }

    #[test]
    fn test_sample_rate_snap_is_monotonic() {
        let caps = r820t();
        let mut previous = 0;
        for hz in (900_001..3_200_000).step_by(12_345) {
            let snapped = caps.snap_sample_rate(hz).unwrap();
            assert!(snapped >= previous, "{} -> {} < {}", hz, snapped, previous);
            previous = snapped;
        }
    }

    #[test]
    fn test_gain_snaps_to_nearest_table_entry() {
        let caps = r820t();
        assert_eq!(caps.snap_gain(Gain::Manual(400)).unwrap(), Gain::Manual(402));
        assert_eq!(caps.snap_gain(Gain::Manual(0)).unwrap(), Gain::Manual(0));
        assert_eq!(caps.snap_gain(Gain::Manual(496)).unwrap(), Gain::Manual(496));
        // 3.2 dB is equidistant from 2.7 and 3.7 dB; lower wins
        assert_eq!(caps.snap_gain(Gain::Manual(32)).unwrap(), Gain::Manual(27));
        assert_eq!(caps.snap_gain(Gain::Auto).unwrap(), Gain::Auto);
    }

    #[test]
    fn test_gain_out_of_range() {
        let caps = r820t();
        assert!(caps.snap_gain(Gain::Manual(-1)).is_err());
        assert!(caps.snap_gain(Gain::Manual(500)).is_err());
    }

    #[test]
    fn test_gain_snap_is_monotonic() {
        let caps = r820t();
        let mut previous = i32::MIN;
        for tenths in 0..=496 {
            let Gain::Manual(snapped) = caps.snap_gain(Gain::Manual(tenths)).unwrap() else {
                panic!("manual gain became auto");
            };
            assert!(snapped >= previous);
            previous = snapped;
        }
    }

    #[test]
    fn test_bandwidth() {
        let caps = r820t();
        assert_eq!(caps.snap_bandwidth(0).unwrap(), 0);
        assert_eq!(caps.snap_bandwidth(1_000_000).unwrap(), 900_000);
        assert_eq!(caps.snap_bandwidth(6_500_000).unwrap(), 7_000_000);
        assert!(caps.snap_bandwidth(100_000).is_err());
        assert!(caps.snap_bandwidth(10_000_000).is_err());
    }

    #[test]
    fn test_bandwidth_auto_only_tuner() {
        let caps = Capabilities::for_tuner(TunerType::E4000, DEFAULT_RTL_XTAL_FREQ);
        assert_eq!(caps.snap_bandwidth(0).unwrap(), 0);
        assert!(caps.snap_bandwidth(1_000_000).is_err());
    }

    #[test]
    fn test_freq_correction() {
        let caps = r820t();
        assert_eq!(caps.check_freq_correction(-57).unwrap(), -57);
        assert!(caps.check_freq_correction(1001).is_err());
    }

    #[test]
    fn test_tuner_tables() {
        let caps = Capabilities::for_tuner(TunerType::Fc0012, DEFAULT_RTL_XTAL_FREQ);
        assert_eq!(caps.gains, vec![-99, -40, 71, 179, 192]);
        assert_eq!(caps.frequency.max, 948_600_000);
        assert!(!caps.supports_bias_tee);
        assert_eq!(TunerType::R828D.to_string(), "Rafael Micro R828D");
    }
}
