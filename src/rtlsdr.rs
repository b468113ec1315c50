//! RTL-SDR USB backend
//! (requires the `rtlsdr` feature)
//!
//! Enumeration goes through the `rs-rtl` crate (plain `rusb`), tuner control
//! and bulk reads through `rtl_sdr_rs`. `rtl_sdr_rs` only drives R820T/R828D
//! tuners and exposes no RTL2832U AGC control, and the capabilities say so.
//!
//! Bulk reads are synchronous in `rtl_sdr_rs`, so a reader thread takes
//! submitted buffers from a queue and fills them one at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, SendError, Sender};
use rs_rtl::UsbRegistry;
use rtl_sdr_rs::{RtlSdr, TunerGain};
use tracing::{debug, info, warn};

use crate::Gain;
use crate::buffer::SampleBuffer;
use crate::capabilities::{Capabilities, DEFAULT_RTL_XTAL_FREQ, TunerType};
use crate::error::{Error, Result};
use crate::registry::DeviceInfo;
use crate::transport::{Completion, CompletionSender, Driver, Transport};

/// Driver for RTL2832U dongles on the local USB bus.
pub struct RtlSdrDriver {
    usb: UsbRegistry,
}

impl RtlSdrDriver {
    pub fn new() -> Result<Self> {
        Ok(Self {
            usb: UsbRegistry::new()?,
        })
    }
}

impl Driver for RtlSdrDriver {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .usb
            .devices()?
            .into_iter()
            .map(|d| DeviceInfo {
                index: d.index,
                vendor_id: d.vendor_id,
                product_id: d.product_id,
                manufacturer: d.manufacturer,
                product: d.product,
                serial: d.serial,
                name: d.name.to_string(),
            })
            .collect())
    }

    fn open(&self, info: &DeviceInfo) -> Result<Arc<dyn Transport>> {
        // Fails with DeviceBusy if another process holds the interface.
        self.usb.probe(info.index)?;
        let rtl = RtlSdr::open_with_index(info.index)?;
        debug!("rtl_sdr_rs opened device {}", info.index);
        Ok(Arc::new(RtlSdrTransport::new(Some(rtl))))
    }
}

enum Command {
    Fill(SampleBuffer),
    Stop,
}

struct Reader {
    tx: Sender<Command>,
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Reader {
    fn stop(self) {
        self.cancelled.store(true, Ordering::Release);
        let _ = self.tx.send(Command::Stop);
        if self.handle.join().is_err() {
            warn!("RTL-SDR reader thread panicked");
        }
    }
}

/// `None` once released; dropping the `RtlSdr` gives the USB interface back.
type SharedRtl = Arc<Mutex<Option<RtlSdr>>>;

struct RtlSdrTransport {
    rtl: SharedRtl,
    reader: Mutex<Option<Reader>>,
}

impl RtlSdrTransport {
    fn new(rtl: Option<RtlSdr>) -> Self {
        Self {
            rtl: Arc::new(Mutex::new(rtl)),
            reader: Mutex::new(None),
        }
    }

    fn with_rtl<T>(&self, f: impl FnOnce(&mut RtlSdr) -> Result<T>) -> Result<T> {
        with_device(&self.rtl, f)
    }

    fn reader(&self) -> MutexGuard<'_, Option<Reader>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for RtlSdrTransport {
    fn capabilities(&self) -> Result<Capabilities> {
        let mut capabilities = Capabilities::for_tuner(TunerType::R820T, DEFAULT_RTL_XTAL_FREQ);
        capabilities.supports_agc = false;
        Ok(capabilities)
    }

    fn set_center_freq(&self, hz: u32) -> Result<u32> {
        self.with_rtl(|rtl| Ok(rtl.set_center_freq(hz)?))?;
        Ok(hz)
    }

    fn set_sample_rate(&self, hz: u32) -> Result<u32> {
        self.with_rtl(|rtl| Ok(rtl.set_sample_rate(hz)?))?;
        Ok(hz)
    }

    fn set_gain(&self, gain: Gain) -> Result<Gain> {
        let tuner_gain = match gain {
            Gain::Auto => TunerGain::Auto,
            Gain::Manual(tenths) => TunerGain::Manual(tenths),
        };
        self.with_rtl(|rtl| Ok(rtl.set_tuner_gain(tuner_gain)?))?;
        Ok(gain)
    }

    fn set_bandwidth(&self, hz: u32) -> Result<u32> {
        self.with_rtl(|rtl| Ok(rtl.set_tuner_bandwidth(hz)?))?;
        Ok(hz)
    }

    fn set_freq_correction(&self, ppm: i32) -> Result<i32> {
        self.with_rtl(|rtl| Ok(rtl.set_freq_correction(ppm)?))?;
        Ok(ppm)
    }

    fn set_agc(&self, _enabled: bool) -> Result<()> {
        Err(Error::Unsupported("RTL2832U AGC"))
    }

    fn set_bias_tee(&self, enabled: bool) -> Result<()> {
        self.with_rtl(|rtl| Ok(rtl.set_bias_tee(enabled)?))
    }

    fn begin(&self, sink: CompletionSender) -> Result<()> {
        self.with_rtl(|rtl| Ok(rtl.reset_buffer()?))?;

        let mut reader = self.reader();
        if let Some(previous) = reader.take() {
            previous.stop();
        }

        let (tx, rx) = crossbeam::channel::unbounded();
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = {
            let rtl = Arc::clone(&self.rtl);
            let cancelled = Arc::clone(&cancelled);
            std::thread::Builder::new()
                .name("rtlstream-usb".into())
                .spawn(move || run_reader(rx, sink, rtl, cancelled))?
        };
        *reader = Some(Reader {
            tx,
            cancelled,
            handle,
        });
        info!("RTL-SDR bulk reader started");
        Ok(())
    }

    fn submit(&self, buffer: SampleBuffer) -> std::result::Result<(), (SampleBuffer, Error)> {
        let reader = self.reader();
        let Some(reader) = reader.as_ref() else {
            return Err((buffer, Error::transport("transport not streaming")));
        };
        match reader.tx.send(Command::Fill(buffer)) {
            Ok(()) => Ok(()),
            Err(SendError(Command::Fill(buffer))) => {
                Err((buffer, Error::transport("reader thread exited")))
            }
            Err(SendError(Command::Stop)) => Ok(()),
        }
    }

    fn cancel_all(&self) -> Result<()> {
        if let Some(reader) = self.reader().as_ref() {
            reader.cancelled.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn release(&self) -> Result<()> {
        if let Some(reader) = self.reader().take() {
            reader.stop();
        }
        let device = self
            .rtl
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(device) = device {
            drop(device);
            info!("RTL-SDR device released");
        }
        Ok(())
    }
}

impl Drop for RtlSdrTransport {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn with_device<T>(rtl: &SharedRtl, f: impl FnOnce(&mut RtlSdr) -> Result<T>) -> Result<T> {
    let mut guard = rtl.lock().unwrap_or_else(PoisonError::into_inner);
    match guard.as_mut() {
        Some(device) => f(device),
        None => Err(Error::transport("device released")),
    }
}

fn run_reader(
    rx: Receiver<Command>,
    sink: CompletionSender,
    rtl: SharedRtl,
    cancelled: Arc<AtomicBool>,
) {
    for command in rx.iter() {
        let mut buffer = match command {
            Command::Fill(buffer) => buffer,
            Command::Stop => break,
        };

        if cancelled.load(Ordering::Acquire) {
            let _ = sink.send(Completion::cancelled(buffer));
            continue;
        }

        let result = with_device(&rtl, |device| Ok(device.read_sync(buffer.storage_mut())?));
        let completion = match result {
            Ok(0) => Completion::failed(buffer, "bulk read returned no data"),
            Ok(n) => {
                buffer.set_len(n);
                Completion::completed(buffer)
            }
            Err(e) => Completion::failed(buffer, e.to_string()),
        };
        if sink.send(completion).is_err() {
            break;
        }
    }
    debug!("RTL-SDR reader thread exiting");
}
