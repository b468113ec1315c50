//! Session facade: one device, one stream, one linear lifecycle.
//!
//! ```text
//! open ─▶ configure ─▶ start ─▶ { read ; release }* ─▶ stop ─▶ close
//! ```

use std::time::Duration;

use tracing::{info, warn};

use crate::Gain;
use crate::buffer::SampleBuffer;
use crate::config::{StreamConfig, TunerConfig};
use crate::device::{DeviceHandle, TunerSettings};
use crate::engine::{StreamReader, StreamStats, StreamingEngine};
use crate::error::{Error, Result};
use crate::registry::{DeviceRegistry, DeviceSelector};
use crate::stream::SampleStream;

/// Lifecycle phase of a [`Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Device open, not streaming
    Open,
    Streaming,
    /// Stream stopped; it may be restarted
    Stopped,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Open => "open",
            SessionState::Streaming => "streaming",
            SessionState::Stopped => "stopped",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/**
 * A device together with its stream
 */
#[derive(Debug)]
pub struct Session {
    device: DeviceHandle,
    engine: Option<StreamingEngine>,
    state: SessionState,
}

impl Session {
    /// Open the device matching `selector`
    pub fn open(registry: &DeviceRegistry, selector: &DeviceSelector) -> Result<Self> {
        Ok(Self::from_device(registry.open(selector)?))
    }

    pub fn from_device(device: DeviceHandle) -> Self {
        Self {
            device,
            engine: None,
            state: SessionState::Open,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn settings(&self) -> &TunerSettings {
        self.device.settings()
    }

    /// Apply tuner settings. Not allowed while streaming.
    pub fn configure(&mut self, config: &TunerConfig) -> Result<&TunerSettings> {
        self.check_configurable("configure")?;
        self.device.apply(config)
    }

    pub fn set_frequency(&mut self, hz: u32) -> Result<u32> {
        self.check_configurable("set frequency")?;
        self.device.set_frequency(hz)
    }

    pub fn set_sample_rate(&mut self, hz: u32) -> Result<u32> {
        self.check_configurable("set sample rate")?;
        self.device.set_sample_rate(hz)
    }

    pub fn set_gain(&mut self, gain: Gain) -> Result<Gain> {
        self.check_configurable("set gain")?;
        self.device.set_gain(gain)
    }

    pub fn set_bandwidth(&mut self, hz: u32) -> Result<u32> {
        self.check_configurable("set bandwidth")?;
        self.device.set_bandwidth(hz)
    }

    pub fn set_freq_correction(&mut self, ppm: i32) -> Result<i32> {
        self.check_configurable("set frequency correction")?;
        self.device.set_freq_correction(ppm)
    }

    pub fn set_agc(&mut self, enabled: bool) -> Result<()> {
        self.check_configurable("set AGC")?;
        self.device.set_agc(enabled)
    }

    pub fn set_bias_tee(&mut self, enabled: bool) -> Result<()> {
        self.check_configurable("set bias tee")?;
        self.device.set_bias_tee(enabled)
    }

    /// Start streaming with `buffer_count` buffers of `buffer_size` bytes
    pub fn start(&mut self, buffer_size: usize, buffer_count: usize) -> Result<()> {
        self.start_with(StreamConfig::new(buffer_size, buffer_count))
    }

    pub fn start_with(&mut self, config: StreamConfig) -> Result<()> {
        match self.state {
            SessionState::Open | SessionState::Stopped => {}
            state => return Err(Error::invalid_state("start", state)),
        }
        // a stopped engine is kept so late reads report `Stopped`
        self.engine = None;
        let engine = self.device.stream(config)?;
        self.engine = Some(engine);
        self.state = SessionState::Streaming;
        info!("session streaming on {}", self.device.info());
        Ok(())
    }

    /// Next buffer in sequence order.
    ///
    /// Blocks until one is ready, or for at most the configured read
    /// timeout, after which [`Error::Timeout`] is returned.
    pub fn read(&self) -> Result<SampleBuffer> {
        let engine = self.engine("read")?;
        match engine.config().read_timeout {
            None => engine.read(),
            Some(timeout) => engine
                .read_timeout(timeout)?
                .ok_or(Error::Timeout(timeout)),
        }
    }

    /// Next buffer, or `None` if none became ready within `timeout`
    pub fn read_timeout(&self, timeout: Duration) -> Result<Option<SampleBuffer>> {
        self.engine("read")?.read_timeout(timeout)
    }

    pub fn try_read(&self) -> Result<Option<SampleBuffer>> {
        self.engine("read")?.try_read()
    }

    pub fn release(&self, buffer: SampleBuffer) -> Result<()> {
        self.engine("release")?.release(buffer)
    }

    /// A cloneable reader for consuming on another thread
    pub fn reader(&self) -> Result<StreamReader> {
        Ok(self.engine("read")?.reader())
    }

    /// Convert the stream into complex samples behind a `futures::Stream`
    pub fn sample_stream(&self) -> Result<SampleStream> {
        SampleStream::spawn(self.reader()?)
    }

    pub fn stats(&self) -> Option<StreamStats> {
        self.engine.as_ref().map(StreamingEngine::stats)
    }

    /// Stop the stream. Stopping a session that is not streaming is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != SessionState::Streaming {
            return Ok(());
        }
        self.state = SessionState::Stopped;
        match self.engine.as_mut() {
            Some(engine) => engine.stop(),
            None => Ok(()),
        }
    }

    /// Stop (if needed) and close the device. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        let stopped = self.stop();
        self.engine = None;
        self.state = SessionState::Closed;
        let closed = self.device.close();
        stopped.and(closed)
    }

    fn check_configurable(&self, operation: &'static str) -> Result<()> {
        match self.state {
            SessionState::Open | SessionState::Stopped => Ok(()),
            state => Err(Error::invalid_state(operation, state)),
        }
    }

    fn engine(&self, operation: &'static str) -> Result<&StreamingEngine> {
        match (self.state, self.engine.as_ref()) {
            (SessionState::Streaming | SessionState::Stopped, Some(engine)) => Ok(engine),
            (state, _) => Err(Error::invalid_state(operation, state)),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("session closed uncleanly: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{CancelBehavior, SimDriver};

    fn session() -> Session {
        let registry = DeviceRegistry::new(SimDriver::new(1));
        Session::open(&registry, &DeviceSelector::Index(0)).unwrap()
    }

    #[test]
    fn test_read_before_start() {
        let session = session();
        assert!(matches!(session.read(), Err(Error::InvalidState { .. })));
        assert!(session.stats().is_none());
    }

    #[test]
    fn test_start_twice() {
        let mut session = session();
        session.start(512, 2).unwrap();
        assert!(matches!(session.start(512, 2), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_configure_while_streaming() {
        let mut session = session();
        session.start(512, 2).unwrap();
        let config = TunerConfig::default().center_freq(100_000_000);
        assert!(matches!(
            session.configure(&config),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            session.set_gain(Gain::Auto),
            Err(Error::InvalidState { .. })
        ));
        session.stop().unwrap();
        session.configure(&config).unwrap();
        assert_eq!(session.settings().center_freq, 100_000_000);
    }

    #[test]
    fn test_read_after_stop() {
        let mut session = session();
        session.start(512, 2).unwrap();
        session.stop().unwrap();
        assert!(matches!(session.read(), Err(Error::Stopped)));
        assert!(matches!(session.try_read(), Err(Error::Stopped)));
    }

    #[test]
    fn test_read_timeout_from_config() {
        let mut session = session();
        let config = StreamConfig::new(512, 2).with_read_timeout(Duration::from_millis(10));
        session.start_with(config).unwrap();
        assert!(matches!(session.read(), Err(Error::Timeout(_))));
    }

    #[test]
    fn test_restart_after_stop() {
        let mut session = session();
        session.start(512, 2).unwrap();
        session.stop().unwrap();
        session.start(1024, 3).unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.stats().unwrap().pool.total, 3);
    }

    #[test]
    fn test_close_stops_stream() {
        let mut session = session();
        session.start(512, 2).unwrap();
        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.device().is_open());
        assert!(matches!(session.read(), Err(Error::InvalidState { .. })));
        session.close().unwrap();
    }

    #[test]
    fn test_drop_releases_device_after_failed_stop() {
        let driver = SimDriver::new(1);
        let sim = driver.device(0).unwrap();
        sim.set_cancel_behavior(CancelBehavior::Stall);
        let registry = DeviceRegistry::new(driver);

        let mut session = Session::open(&registry, &DeviceSelector::Index(0)).unwrap();
        let config = StreamConfig::new(512, 2).with_drain_timeout(Duration::from_millis(20));
        session.start_with(config).unwrap();
        drop(session);

        assert!(sim.is_released());
        assert!(!registry.is_claimed(0));
        assert!(Session::open(&registry, &DeviceSelector::Index(0)).is_ok());
    }
}
