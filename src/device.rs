//! Open device handle.
//!
//! Every setter validates its argument against the [`Capabilities`] fetched
//! at open, snaps it to the nearest hardware step and records the value the
//! transport reports back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::Gain;
use crate::capabilities::{Capabilities, TunerType};
use crate::config::{StreamConfig, TunerConfig};
use crate::engine::StreamingEngine;
use crate::error::{Error, Result};
use crate::registry::{Claim, DeviceInfo};
use crate::transport::Transport;

/// Tuner state as last reported by the hardware
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TunerSettings {
    /// Center frequency in Hz
    pub center_freq: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    pub gain: Gain,
    /// IF bandwidth in Hz, 0 when automatic
    pub bandwidth: u32,
    /// Crystal correction in ppm
    pub freq_correction: i32,
    pub agc: bool,
    pub bias_tee: bool,
}

/**
 * An open, claimed device
 *
 * Obtained from [`crate::DeviceRegistry::open`]. At most one stream can run
 * on a handle at a time. Dropping the handle closes it.
 */
pub struct DeviceHandle {
    info: DeviceInfo,
    transport: Arc<dyn Transport>,
    capabilities: Capabilities,
    settings: TunerSettings,
    streaming: Arc<AtomicBool>,
    claim: Option<Claim>,
    open: bool,
}

impl DeviceHandle {
    pub(crate) fn open(
        info: DeviceInfo,
        transport: Arc<dyn Transport>,
        claim: Option<Claim>,
    ) -> Result<Self> {
        let capabilities = transport.capabilities()?;
        debug!("{}: tuner {}", info.name, capabilities.tuner);

        let mut handle = Self {
            info,
            transport,
            capabilities,
            settings: TunerSettings::default(),
            streaming: Arc::new(AtomicBool::new(false)),
            claim,
            open: true,
        };
        let factory = factory_config(&handle.capabilities);
        handle.apply(&factory)?;
        Ok(handle)
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn tuner(&self) -> TunerType {
        self.capabilities.tuner
    }

    /// Supported manual gains in tenths of dB
    pub fn gains(&self) -> &[i32] {
        &self.capabilities.gains
    }

    pub fn settings(&self) -> &TunerSettings {
        &self.settings
    }

    pub fn center_freq(&self) -> u32 {
        self.settings.center_freq
    }

    pub fn sample_rate(&self) -> u32 {
        self.settings.sample_rate
    }

    pub fn gain(&self) -> Gain {
        self.settings.gain
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Tune to `hz`, returning the frequency the tuner locked to
    pub fn set_frequency(&mut self, hz: u32) -> Result<u32> {
        self.check_open("set frequency")?;
        let snapped = self.capabilities.snap_frequency(hz)?;
        let actual = self.transport.set_center_freq(snapped)?;
        debug!("center frequency {} Hz (requested {})", actual, hz);
        self.settings.center_freq = actual;
        Ok(actual)
    }

    pub fn set_sample_rate(&mut self, hz: u32) -> Result<u32> {
        self.check_open("set sample rate")?;
        let snapped = self.capabilities.snap_sample_rate(hz)?;
        let actual = self.transport.set_sample_rate(snapped)?;
        debug!("sample rate {} Hz (requested {})", actual, hz);
        self.settings.sample_rate = actual;
        Ok(actual)
    }

    pub fn set_gain(&mut self, gain: Gain) -> Result<Gain> {
        self.check_open("set gain")?;
        let snapped = self.capabilities.snap_gain(gain)?;
        let actual = self.transport.set_gain(snapped)?;
        debug!("tuner gain {} (requested {})", actual, gain);
        self.settings.gain = actual;
        Ok(actual)
    }

    /// Set the IF bandwidth, `0` for automatic
    pub fn set_bandwidth(&mut self, hz: u32) -> Result<u32> {
        self.check_open("set bandwidth")?;
        let snapped = self.capabilities.snap_bandwidth(hz)?;
        let actual = self.transport.set_bandwidth(snapped)?;
        debug!("bandwidth {} Hz (requested {})", actual, hz);
        self.settings.bandwidth = actual;
        Ok(actual)
    }

    pub fn set_freq_correction(&mut self, ppm: i32) -> Result<i32> {
        self.check_open("set frequency correction")?;
        let ppm = self.capabilities.check_freq_correction(ppm)?;
        let actual = self.transport.set_freq_correction(ppm)?;
        debug!("frequency correction {} ppm", actual);
        self.settings.freq_correction = actual;
        Ok(actual)
    }

    /// Enable or disable the RTL2832U digital AGC
    pub fn set_agc(&mut self, enabled: bool) -> Result<()> {
        self.check_open("set AGC")?;
        if !self.capabilities.supports_agc {
            return Err(Error::Unsupported("RTL2832U AGC"));
        }
        self.transport.set_agc(enabled)?;
        self.settings.agc = enabled;
        Ok(())
    }

    pub fn set_bias_tee(&mut self, enabled: bool) -> Result<()> {
        self.check_open("set bias tee")?;
        if !self.capabilities.supports_bias_tee {
            return Err(Error::Unsupported("bias tee"));
        }
        self.transport.set_bias_tee(enabled)?;
        self.settings.bias_tee = enabled;
        Ok(())
    }

    /// Apply every field set in `config`.
    ///
    /// The sample rate goes first since the tuner IF depends on it. Stops
    /// at the first rejected value; fields applied before it stay applied.
    pub fn apply(&mut self, config: &TunerConfig) -> Result<&TunerSettings> {
        if let Some(hz) = config.sample_rate {
            self.set_sample_rate(hz)?;
        }
        if let Some(hz) = config.center_freq {
            self.set_frequency(hz)?;
        }
        if let Some(ppm) = config.freq_correction {
            self.set_freq_correction(ppm)?;
        }
        if let Some(gain) = config.gain {
            self.set_gain(gain)?;
        }
        if let Some(hz) = config.bandwidth {
            self.set_bandwidth(hz)?;
        }
        if let Some(enabled) = config.agc {
            self.set_agc(enabled)?;
        }
        if let Some(enabled) = config.bias_tee {
            self.set_bias_tee(enabled)?;
        }
        Ok(&self.settings)
    }

    /// Start streaming with `config`.
    ///
    /// Fails with [`Error::InvalidState`] if a stream is already running on
    /// this handle.
    pub fn stream(&self, config: StreamConfig) -> Result<StreamingEngine> {
        self.check_open("start streaming")?;
        if self
            .streaming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::invalid_state("start streaming", "streaming"));
        }

        StreamingEngine::start(
            Arc::clone(&self.transport),
            config,
            Arc::clone(&self.streaming),
        )
        .inspect_err(|_| self.streaming.store(false, Ordering::Release))
    }

    /// Release the device. Closing twice is a no-op; closing while a
    /// stream is running fails with [`Error::InvalidState`].
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        if self.is_streaming() {
            return Err(Error::invalid_state("close", "streaming"));
        }
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.open = false;
        self.claim = None;
        let res = self.transport.release();
        info!("closed {}", self.info);
        res
    }

    fn check_open(&self, operation: &'static str) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::invalid_state(operation, "closed"))
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if self.is_streaming() {
            warn!("{} dropped while streaming", self.info);
        }
        if let Err(err) = self.shutdown() {
            warn!("closing {}: {}", self.info, err);
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("info", &self.info)
            .field("settings", &self.settings)
            .field("open", &self.open)
            .field("streaming", &self.is_streaming())
            .finish()
    }
}

// Factory defaults, pulled inside the tuner's limits and stripped of
// controls it lacks.
fn factory_config(capabilities: &Capabilities) -> TunerConfig {
    let mut config = TunerConfig::factory();
    let range = &capabilities.frequency;
    config.center_freq = config.center_freq.map(|hz| hz.clamp(range.min, range.max));
    if !capabilities.supports_agc {
        config.agc = None;
    }
    if !capabilities.supports_bias_tee {
        config.bias_tee = None;
    }
    config
}
