//! Simulated dongle.
//!
//! [`SimTransport`] implements [`Transport`] without hardware. Submitted
//! buffers simply queue up until the caller completes them with
//! [`SimTransport::complete_next`] or fails them with
//! [`SimTransport::fail_next`], which makes stream behaviour fully
//! deterministic in tests and demos.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::Gain;
use crate::buffer::SampleBuffer;
use crate::capabilities::Capabilities;
use crate::device::TunerSettings;
use crate::error::{Error, Result};
use crate::registry::DeviceInfo;
use crate::transport::{Completion, CompletionSender, Driver, Transport};

/// What [`Transport::cancel_all`] does with queued buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelBehavior {
    /// Return every queued buffer as cancelled right away
    #[default]
    Immediate,
    /// Keep the buffers; they never come back
    Stall,
}

#[derive(Default)]
struct SimState {
    sink: Option<CompletionSender>,
    pending: VecDeque<SampleBuffer>,
    settings: TunerSettings,
    cancel: CancelBehavior,
    released: bool,
    unplugged: bool,
    submitted: u64,
}

/// A transport whose transfers complete only when told to.
#[derive(Default)]
pub struct SimTransport {
    capabilities: Capabilities,
    state: Mutex<SimState>,
}

impl SimTransport {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            state: Mutex::new(SimState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of buffers currently queued on the transport
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Total number of accepted submissions
    pub fn submitted(&self) -> u64 {
        self.lock().submitted
    }

    /// Tuner state as last set through the transport
    pub fn settings(&self) -> TunerSettings {
        self.lock().settings.clone()
    }

    pub fn set_cancel_behavior(&self, behavior: CancelBehavior) {
        self.lock().cancel = behavior;
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    /// Fill the oldest queued buffer with `bytes` and complete it.
    /// Returns `false` if nothing was queued.
    pub fn complete_next(&self, bytes: &[u8]) -> bool {
        self.complete_next_with(|buf| {
            let n = bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            n
        })
    }

    /// Complete the oldest queued buffer, letting `fill` write into its
    /// storage and return the number of valid bytes.
    pub fn complete_next_with<F>(&self, fill: F) -> bool
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        let Some((mut buffer, sink)) = self.pop_pending() else {
            return false;
        };
        let len = fill(buffer.storage_mut());
        buffer.set_len(len);
        sink.send(Completion::completed(buffer)).is_ok()
    }

    /// Fail the oldest queued buffer with a transfer error
    pub fn fail_next(&self, reason: &str) -> bool {
        let Some((buffer, sink)) = self.pop_pending() else {
            return false;
        };
        sink.send(Completion::failed(buffer, reason)).is_ok()
    }

    /// Simulate pulling the dongle out: every queued transfer fails and
    /// later submissions are refused.
    pub fn unplug(&self) {
        let (drained, sink) = {
            let mut state = self.lock();
            state.unplugged = true;
            (std::mem::take(&mut state.pending), state.sink.clone())
        };
        debug!("sim: unplugged with {} transfer(s) queued", drained.len());
        if let Some(sink) = sink {
            for buffer in drained {
                let _ = sink.send(Completion::failed(buffer, "LIBUSB_ERROR_NO_DEVICE"));
            }
        }
    }

    fn pop_pending(&self) -> Option<(SampleBuffer, CompletionSender)> {
        let mut state = self.lock();
        let sink = state.sink.clone()?;
        let buffer = state.pending.pop_front()?;
        Some((buffer, sink))
    }

    fn control<T>(&self, f: impl FnOnce(&mut TunerSettings) -> T) -> Result<T> {
        let mut state = self.lock();
        if state.unplugged {
            return Err(Error::DeviceDisconnected("LIBUSB_ERROR_NO_DEVICE".into()));
        }
        if state.released {
            return Err(Error::transport("device released"));
        }
        Ok(f(&mut state.settings))
    }
}

impl Transport for SimTransport {
    fn capabilities(&self) -> Result<Capabilities> {
        Ok(self.capabilities.clone())
    }

    fn set_center_freq(&self, hz: u32) -> Result<u32> {
        self.control(|s| {
            s.center_freq = hz;
            hz
        })
    }

    fn set_sample_rate(&self, hz: u32) -> Result<u32> {
        self.control(|s| {
            s.sample_rate = hz;
            hz
        })
    }

    fn set_gain(&self, gain: Gain) -> Result<Gain> {
        self.control(|s| {
            s.gain = gain;
            gain
        })
    }

    fn set_bandwidth(&self, hz: u32) -> Result<u32> {
        self.control(|s| {
            s.bandwidth = hz;
            hz
        })
    }

    fn set_freq_correction(&self, ppm: i32) -> Result<i32> {
        self.control(|s| {
            s.freq_correction = ppm;
            ppm
        })
    }

    fn set_agc(&self, enabled: bool) -> Result<()> {
        self.control(|s| s.agc = enabled)
    }

    fn set_bias_tee(&self, enabled: bool) -> Result<()> {
        self.control(|s| s.bias_tee = enabled)
    }

    fn begin(&self, sink: CompletionSender) -> Result<()> {
        self.control(|_| ())?;
        let mut state = self.lock();
        state.sink = Some(sink);
        state.pending.clear();
        Ok(())
    }

    fn submit(&self, buffer: SampleBuffer) -> std::result::Result<(), (SampleBuffer, Error)> {
        let mut state = self.lock();
        if state.unplugged {
            return Err((
                buffer,
                Error::DeviceDisconnected("LIBUSB_ERROR_NO_DEVICE".into()),
            ));
        }
        if state.released || state.sink.is_none() {
            return Err((buffer, Error::transport("transport not streaming")));
        }
        trace!("sim: queued slot {}", buffer.slot());
        state.pending.push_back(buffer);
        state.submitted += 1;
        Ok(())
    }

    fn cancel_all(&self) -> Result<()> {
        let (cancelled, sink) = {
            let mut state = self.lock();
            if state.cancel == CancelBehavior::Stall {
                debug!("sim: ignoring cancel, {} transfer(s) stalled", state.pending.len());
                return Ok(());
            }
            (std::mem::take(&mut state.pending), state.sink.clone())
        };
        if let Some(sink) = sink {
            for buffer in cancelled {
                let _ = sink.send(Completion::cancelled(buffer));
            }
        }
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let mut state = self.lock();
        state.released = true;
        state.sink = None;
        Ok(())
    }
}

/// Enumeration entry for simulated device `index`
pub fn sim_info(index: usize) -> DeviceInfo {
    DeviceInfo {
        index,
        vendor_id: 0x0bda,
        product_id: 0x2838,
        manufacturer: "Realtek".into(),
        product: "RTL2838UHIDIR".into(),
        serial: format!("{:08}", index + 1),
        name: "Generic RTL2832U OEM".into(),
    }
}

struct SimDevice {
    info: DeviceInfo,
    transport: Arc<SimTransport>,
    /// Held by another process
    busy: AtomicBool,
}

/// A [`Driver`] over a fixed set of simulated dongles.
pub struct SimDriver {
    devices: Vec<SimDevice>,
}

impl SimDriver {
    /// `count` R820T dongles with sequential serial numbers
    pub fn new(count: usize) -> Self {
        Self::with_devices((0..count).map(|i| (sim_info(i), Capabilities::default())))
    }

    pub fn with_devices<I>(devices: I) -> Self
    where
        I: IntoIterator<Item = (DeviceInfo, Capabilities)>,
    {
        Self {
            devices: devices
                .into_iter()
                .map(|(info, capabilities)| SimDevice {
                    info,
                    transport: Arc::new(SimTransport::new(capabilities)),
                    busy: AtomicBool::new(false),
                })
                .collect(),
        }
    }

    /// Transport of device `index`, for driving its transfers
    pub fn device(&self, index: usize) -> Option<Arc<SimTransport>> {
        self.devices
            .iter()
            .find(|d| d.info.index == index)
            .map(|d| Arc::clone(&d.transport))
    }

    /// Mark device `index` as claimed by someone else
    pub fn set_busy(&self, index: usize, busy: bool) {
        if let Some(device) = self.devices.iter().find(|d| d.info.index == index) {
            device.busy.store(busy, Ordering::Release);
        }
    }
}

impl Driver for SimDriver {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.iter().map(|d| d.info.clone()).collect())
    }

    fn open(&self, info: &DeviceInfo) -> Result<Arc<dyn Transport>> {
        let device = self
            .devices
            .iter()
            .find(|d| d.info.index == info.index)
            .ok_or_else(|| Error::DeviceNotFound(format!("index {}", info.index)))?;
        if device.busy.load(Ordering::Acquire) {
            return Err(Error::DeviceBusy(info.to_string()));
        }
        let mut state = device.transport.lock();
        state.released = false;
        state.sink = None;
        drop(state);
        Ok(device.transport.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_requires_begin() {
        let sim = SimTransport::default();
        let (_, err) = sim.submit(SampleBuffer::new(0, 16)).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn test_stall_keeps_buffers() {
        let sim = SimTransport::default();
        let (sink, _rx) = CompletionSender::channel();
        sim.begin(sink).unwrap();
        sim.submit(SampleBuffer::new(0, 16)).unwrap();
        sim.set_cancel_behavior(CancelBehavior::Stall);
        sim.cancel_all().unwrap();
        assert_eq!(sim.pending(), 1);
        sim.set_cancel_behavior(CancelBehavior::Immediate);
        sim.cancel_all().unwrap();
        assert_eq!(sim.pending(), 0);
    }

    #[test]
    fn test_released_transport_rejects_control() {
        let sim = SimTransport::default();
        sim.release().unwrap();
        assert!(sim.set_center_freq(100_000_000).is_err());
        assert!(sim.is_released());
    }

    #[test]
    fn test_driver_lists_devices() {
        let driver = SimDriver::new(3);
        let devices = driver.enumerate().unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[2].serial, "00000003");
        assert!(driver.device(1).is_some());
        assert!(driver.device(7).is_none());
    }
}
