//! Capture file replay.
//!
//! [`ReplayDriver`] presents a recorded I/Q file as a single dongle. Tuner
//! settings are accepted and recorded but do not change the data; each
//! submitted buffer is filled with the next chunk of the file, converted to
//! cu8 if the capture uses another format. End of file faults the stream
//! the way an unplugged dongle would, unless looping is enabled.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{Receiver, SendError, Sender};
use tracing::{debug, info, warn};

use crate::buffer::SampleBuffer;
use crate::capabilities::Capabilities;
use crate::device::TunerSettings;
use crate::error::{Error, Result};
use crate::registry::DeviceInfo;
use crate::transport::{Completion, CompletionSender, Driver, Transport};
use crate::{Gain, IqFormat};

/**
 * Replay source configuration
 */
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayConfig {
    /// Capture file, `~` is expanded
    pub path: PathBuf,
    pub iq_format: IqFormat,
    /// Restart from the beginning at end of file
    pub looping: bool,
    /// Pace completions at the configured sample rate
    pub realtime: bool,
}

impl ReplayConfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: expanduser(path.as_ref().to_path_buf()),
            iq_format: IqFormat::Cu8,
            looping: false,
            realtime: false,
        }
    }

    pub fn iq_format(mut self, iq_format: IqFormat) -> Self {
        self.iq_format = iq_format;
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

/// A driver exposing one capture file as device 0.
pub struct ReplayDriver {
    config: ReplayConfig,
    open: Arc<AtomicBool>,
}

impl ReplayDriver {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    fn info(&self) -> DeviceInfo {
        let serial = self
            .config
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        DeviceInfo {
            index: 0,
            vendor_id: 0,
            product_id: 0,
            manufacturer: "rtlstream".into(),
            product: "replay".into(),
            serial,
            name: "Capture file replay".into(),
        }
    }
}

impl Driver for ReplayDriver {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        if !self.config.path.is_file() {
            return Ok(Vec::new());
        }
        Ok(vec![self.info()])
    }

    fn open(&self, info: &DeviceInfo) -> Result<Arc<dyn Transport>> {
        if info.index != 0 {
            return Err(Error::DeviceNotFound(format!("index {}", info.index)));
        }
        if self
            .open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::DeviceBusy(info.to_string()));
        }
        Ok(Arc::new(ReplayTransport {
            config: self.config.clone(),
            settings: Mutex::new(TunerSettings::default()),
            pump: Mutex::new(None),
            open: Arc::clone(&self.open),
            released: AtomicBool::new(false),
        }))
    }
}

enum Command {
    Fill(SampleBuffer),
    Stop,
}

struct Pump {
    tx: Sender<Command>,
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Pump {
    fn stop(self) {
        let _ = self.tx.send(Command::Stop);
        if self.handle.join().is_err() {
            warn!("replay pump panicked");
        }
    }
}

struct ReplayTransport {
    config: ReplayConfig,
    settings: Mutex<TunerSettings>,
    pump: Mutex<Option<Pump>>,
    open: Arc<AtomicBool>,
    released: AtomicBool,
}

impl ReplayTransport {
    fn settings(&self) -> Result<MutexGuard<'_, TunerSettings>> {
        if self.released.load(Ordering::Acquire) {
            return Err(Error::transport("device released"));
        }
        Ok(self.settings.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn pump(&self) -> MutexGuard<'_, Option<Pump>> {
        self.pump.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for ReplayTransport {
    fn capabilities(&self) -> Result<Capabilities> {
        Ok(Capabilities::default())
    }

    fn set_center_freq(&self, hz: u32) -> Result<u32> {
        self.settings()?.center_freq = hz;
        Ok(hz)
    }

    fn set_sample_rate(&self, hz: u32) -> Result<u32> {
        self.settings()?.sample_rate = hz;
        Ok(hz)
    }

    fn set_gain(&self, gain: Gain) -> Result<Gain> {
        self.settings()?.gain = gain;
        Ok(gain)
    }

    fn set_bandwidth(&self, hz: u32) -> Result<u32> {
        self.settings()?.bandwidth = hz;
        Ok(hz)
    }

    fn set_freq_correction(&self, ppm: i32) -> Result<i32> {
        self.settings()?.freq_correction = ppm;
        Ok(ppm)
    }

    fn set_agc(&self, enabled: bool) -> Result<()> {
        self.settings()?.agc = enabled;
        Ok(())
    }

    fn set_bias_tee(&self, enabled: bool) -> Result<()> {
        self.settings()?.bias_tee = enabled;
        Ok(())
    }

    fn begin(&self, sink: CompletionSender) -> Result<()> {
        let sample_rate = self.settings()?.sample_rate;
        let file = File::open(&self.config.path)?;
        info!("replaying {}", self.config.path.display());

        let mut pump = self.pump();
        if let Some(previous) = pump.take() {
            previous.stop();
        }

        let (tx, rx) = crossbeam::channel::unbounded();
        let cancelled = Arc::new(AtomicBool::new(false));
        let source = Source {
            reader: BufReader::new(file),
            iq_format: self.config.iq_format,
            looping: self.config.looping,
            pacing: self.config.realtime.then_some(sample_rate).filter(|&sr| sr > 0),
            scratch: Vec::new(),
        };
        let handle = {
            let cancelled = Arc::clone(&cancelled);
            std::thread::Builder::new()
                .name("rtlstream-replay".into())
                .spawn(move || run_pump(rx, sink, source, cancelled))?
        };
        *pump = Some(Pump {
            tx,
            cancelled,
            handle,
        });
        Ok(())
    }

    fn submit(&self, buffer: SampleBuffer) -> std::result::Result<(), (SampleBuffer, Error)> {
        let pump = self.pump();
        let Some(pump) = pump.as_ref() else {
            return Err((buffer, Error::transport("transport not streaming")));
        };
        match pump.tx.send(Command::Fill(buffer)) {
            Ok(()) => Ok(()),
            Err(SendError(Command::Fill(buffer))) => {
                Err((buffer, Error::transport("replay pump exited")))
            }
            Err(SendError(Command::Stop)) => Ok(()),
        }
    }

    fn cancel_all(&self) -> Result<()> {
        if let Some(pump) = self.pump().as_ref() {
            pump.cancelled.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(pump) = self.pump().take() {
            pump.stop();
        }
        self.open.store(false, Ordering::Release);
        Ok(())
    }
}

impl Drop for ReplayTransport {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

struct Source {
    reader: BufReader<File>,
    iq_format: IqFormat,
    looping: bool,
    /// Sample rate to pace at, if any
    pacing: Option<u32>,
    scratch: Vec<u8>,
}

impl Source {
    /// Fill `buffer` with the next chunk, converted to cu8. Returns the
    /// number of bytes written, 0 at end of file.
    fn fill(&mut self, buffer: &mut SampleBuffer) -> std::io::Result<usize> {
        let samples = buffer.capacity() / 2;
        if self.iq_format == IqFormat::Cu8 {
            let n = self.read_chunk(samples * 2)?;
            buffer.storage_mut()[..n].copy_from_slice(&self.scratch[..n]);
            buffer.set_len(n);
            return Ok(n);
        }

        let bytes_per_sample = self.iq_format.bytes_per_sample();
        let n = self.read_chunk(samples * bytes_per_sample)?;
        let complex = crate::convert_bytes_to_complex(self.iq_format, &self.scratch[..n]);
        let mut cu8 = Vec::with_capacity(complex.len() * 2);
        crate::convert_complex_to_cu8(&complex, &mut cu8);
        Ok(buffer.fill_from(&cu8))
    }

    fn read_chunk(&mut self, len: usize) -> std::io::Result<usize> {
        self.scratch.resize(len, 0);
        let mut filled = 0;
        let mut rewound = false;
        while filled < len {
            let n = self.reader.read(&mut self.scratch[filled..])?;
            if n == 0 {
                // an empty file must not spin forever
                if !self.looping || (rewound && filled == 0) {
                    break;
                }
                self.reader.seek(SeekFrom::Start(0))?;
                rewound = true;
                continue;
            }
            filled += n;
        }
        Ok(filled)
    }
}

fn run_pump(
    rx: Receiver<Command>,
    sink: CompletionSender,
    mut source: Source,
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

        let completion = match source.fill(&mut buffer) {
            Ok(0) => Completion::failed(buffer, "end of capture"),
            Ok(n) => {
                if let Some(sample_rate) = source.pacing {
                    let secs = (n / 2) as f64 / f64::from(sample_rate);
                    std::thread::sleep(Duration::from_secs_f64(secs));
                }
                Completion::completed(buffer)
            }
            Err(e) => Completion::failed(buffer, e.to_string()),
        };
        if sink.send(completion).is_err() {
            break;
        }
    }
    debug!("replay pump exiting");
}

fn expanduser(path: PathBuf) -> PathBuf {
    // Check if the path starts with "~"
    if let Some(stripped) = path.to_str().and_then(|p| p.strip_prefix("~"))
        && let Some(home_dir) = dirs::home_dir()
    {
        return home_dir.join(stripped.trim_start_matches('/'));
    }
    path
}
