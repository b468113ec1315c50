//! Streaming engine.
//!
//! Keeps every pool buffer queued on the transport while the stream is
//! active. Completions arrive on a crossbeam channel and are drained by one
//! background thread, which moves buffers from submitted to ready and
//! resubmits free ones. The consumer reads ready buffers in sequence order
//! and releases them back.
//!
//! Pool state lives behind a single mutex with two condition variables:
//! `ready` wakes blocked readers, `drained` wakes `stop` while in-flight
//! transfers come back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;
use tracing::{debug, info, trace, warn};

use crate::buffer::SampleBuffer;
use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::pool::{BufferPool, PoolCounts};
use crate::transport::{Completion, CompletionSender, Event, TransferStatus, Transport};

/// Lifecycle of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Transfers are being submitted and delivered
    Active,
    /// `stop` is draining in-flight transfers
    Stopping,
    Stopped,
    /// A transfer failed; the device must be closed and reopened
    Faulted,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StreamState::Active => "active",
            StreamState::Stopping => "stopping",
            StreamState::Stopped => "stopped",
            StreamState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Snapshot of stream counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    pub state: StreamState,
    pub pool: PoolCounts,
    /// Transfers that came back filled
    pub completed: u64,
    /// Buffers handed to the consumer
    pub delivered: u64,
    /// Buffers dropped without delivery (cancelled or flushed on stop)
    pub discarded: u64,
    /// Completions or releases that did not match the pool
    pub stale: u64,
    /// Completions that found no free buffer to resubmit
    pub backpressure_events: u64,
}

#[derive(Debug, Default)]
struct Counters {
    completed: u64,
    delivered: u64,
    discarded: u64,
    stale: u64,
    backpressure_events: u64,
}

struct Inner {
    state: StreamState,
    pool: BufferPool,
    fault: Option<String>,
    counters: Counters,
}

impl Inner {
    fn check_readable(&self) -> Result<()> {
        match self.state {
            StreamState::Active => Ok(()),
            StreamState::Stopping | StreamState::Stopped => Err(Error::Stopped),
            StreamState::Faulted => Err(self.disconnected()),
        }
    }

    fn disconnected(&self) -> Error {
        Error::DeviceDisconnected(
            self.fault
                .clone()
                .unwrap_or_else(|| "transfer failed".to_string()),
        )
    }

    fn set_fault(&mut self, reason: String) {
        if self.state == StreamState::Active {
            warn!("stream faulted: {}", reason);
            self.state = StreamState::Faulted;
            self.fault = Some(reason);
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    ready: Condvar,
    drained: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue every free buffer on the transport. Returns how many were
    /// submitted.
    fn refill(&self, inner: &mut Inner, transport: &dyn Transport) -> usize {
        let mut submitted = 0;
        while inner.state == StreamState::Active {
            let Some(buffer) = inner.pool.acquire_free() else {
                break;
            };
            let sequence = buffer.sequence();
            match transport.submit(buffer) {
                Ok(()) => {
                    trace!("submitted sequence {}", sequence);
                    submitted += 1;
                }
                Err((buffer, err)) => {
                    if let Err(stale) = inner.pool.unsubmit(buffer) {
                        warn!("refused buffer is stale: {:?}", stale);
                    }
                    inner.set_fault(format!("submit failed: {}", err));
                    self.ready.notify_all();
                }
            }
        }
        submitted
    }

    fn on_completion(&self, completion: Completion, transport: &dyn Transport) {
        let Completion { buffer, status } = completion;
        let (slot, sequence) = (buffer.slot(), buffer.sequence());
        let mut inner = self.lock();

        match (inner.state, status) {
            (StreamState::Active, TransferStatus::Completed) => {
                trace!("completed slot {} sequence {}", slot, sequence);
                if let Err((_, stale)) = inner.pool.mark_ready(buffer) {
                    warn!("dropping stale completion: {:?}", stale);
                    inner.counters.stale += 1;
                    return;
                }
                inner.counters.completed += 1;
                if !inner.pool.has_free() {
                    inner.counters.backpressure_events += 1;
                    debug!("backpressured, {} buffer(s) queued", inner.pool.counts().ready);
                }
                self.refill(&mut inner, transport);
                self.ready.notify_all();
            }
            (_, TransferStatus::Error(reason)) => {
                if inner.pool.mark_free(buffer).is_err() {
                    inner.counters.stale += 1;
                } else {
                    inner.counters.discarded += 1;
                }
                inner.set_fault(reason);
                self.ready.notify_all();
                self.drained.notify_all();
            }
            (state, status) => {
                trace!(
                    "discarding slot {} sequence {} ({:?} while {})",
                    slot, sequence, status, state
                );
                if inner.pool.mark_free(buffer).is_err() {
                    inner.counters.stale += 1;
                } else {
                    inner.counters.discarded += 1;
                }
                // a transfer cancelled behind our back is simply requeued
                if state == StreamState::Active {
                    self.refill(&mut inner, transport);
                }
                self.drained.notify_all();
            }
        }
    }

    fn read(&self, deadline: Option<Instant>, block: bool) -> Result<Option<SampleBuffer>> {
        let mut inner = self.lock();
        loop {
            inner.check_readable()?;
            if let Some(buffer) = inner.pool.take_ready() {
                inner.counters.delivered += 1;
                return Ok(Some(buffer));
            }
            if !block {
                return Ok(None);
            }
            inner = match deadline {
                None => self
                    .ready
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    self.ready
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn release(&self, buffer: SampleBuffer, transport: &dyn Transport) -> Result<()> {
        let mut inner = self.lock();
        if let Err((_, stale)) = inner.pool.mark_free(buffer) {
            inner.counters.stale += 1;
            return Err(Error::StaleBuffer {
                slot: stale.slot,
                sequence: stale.sequence,
            });
        }
        match inner.state {
            StreamState::Active => {
                self.refill(&mut inner, transport);
                Ok(())
            }
            StreamState::Faulted => Err(inner.disconnected()),
            StreamState::Stopping | StreamState::Stopped => Ok(()),
        }
    }

    fn stats(&self) -> StreamStats {
        let inner = self.lock();
        StreamStats {
            state: inner.state,
            pool: inner.pool.counts(),
            completed: inner.counters.completed,
            delivered: inner.counters.delivered,
            discarded: inner.counters.discarded,
            stale: inner.counters.stale,
            backpressure_events: inner.counters.backpressure_events,
        }
    }
}

fn run_completions(rx: Receiver<Event>, shared: Arc<Shared>, transport: Arc<dyn Transport>) {
    for event in rx.iter() {
        match event {
            Event::Completion(completion) => shared.on_completion(completion, transport.as_ref()),
            Event::Shutdown => break,
        }
    }
    debug!("completion thread exiting");
}

/// Consumer side of a stream, cloneable across threads.
///
/// A reader blocked in [`StreamReader::read`] is woken with
/// [`Error::Stopped`] when the owning engine stops.
#[derive(Clone)]
pub struct StreamReader {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
}

impl StreamReader {
    /// Block until the next buffer in sequence order is ready
    pub fn read(&self) -> Result<SampleBuffer> {
        self.shared
            .read(None, true)?
            .ok_or(Error::Stopped)
    }

    /// Like [`StreamReader::read`], returning `None` if nothing became
    /// ready within `timeout`
    pub fn read_timeout(&self, timeout: Duration) -> Result<Option<SampleBuffer>> {
        // a deadline past the end of `Instant` waits without bound
        self.shared.read(Instant::now().checked_add(timeout), true)
    }

    /// Return the next ready buffer without blocking
    pub fn try_read(&self) -> Result<Option<SampleBuffer>> {
        self.shared.read(None, false)
    }

    /// Hand a buffer back to the pool for resubmission
    pub fn release(&self, buffer: SampleBuffer) -> Result<()> {
        self.shared.release(buffer, self.transport.as_ref())
    }

    pub fn state(&self) -> StreamState {
        self.shared.lock().state
    }

    pub fn stats(&self) -> StreamStats {
        self.shared.stats()
    }
}

/**
 * A running stream over one device transport
 *
 * Created by [`crate::DeviceHandle::stream`]. Dropping the engine stops it.
 */
pub struct StreamingEngine {
    reader: StreamReader,
    sink: CompletionSender,
    config: StreamConfig,
    worker: Option<JoinHandle<()>>,
    streaming: Arc<AtomicBool>,
}

impl StreamingEngine {
    /// Allocate the pool and submit every buffer. `streaming` is the device's
    /// single-stream flag; it is cleared when the engine stops.
    pub(crate) fn start(
        transport: Arc<dyn Transport>,
        config: StreamConfig,
        streaming: Arc<AtomicBool>,
    ) -> Result<Self> {
        config.validate()?;

        let (sink, rx) = CompletionSender::channel();
        transport.begin(sink.clone())?;

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: StreamState::Active,
                pool: BufferPool::new(config.buffer_size, config.buffer_count),
                fault: None,
                counters: Counters::default(),
            }),
            ready: Condvar::new(),
            drained: Condvar::new(),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            let transport = Arc::clone(&transport);
            std::thread::Builder::new()
                .name("rtlstream-completions".into())
                .spawn(move || run_completions(rx, shared, transport))?
        };

        let mut engine = Self {
            reader: StreamReader { shared, transport },
            sink,
            config,
            worker: Some(worker),
            streaming,
        };

        let submitted = {
            let shared = &engine.reader.shared;
            let mut inner = shared.lock();
            let submitted = shared.refill(&mut inner, engine.reader.transport.as_ref());
            if inner.state != StreamState::Active {
                Err(inner.disconnected())
            } else {
                Ok(submitted)
            }
        };

        match submitted {
            Ok(count) => {
                info!(
                    "stream started: {} x {} bytes in flight",
                    count, engine.config.buffer_size
                );
                Ok(engine)
            }
            Err(err) => {
                warn!("stream failed to start: {}", err);
                let _ = engine.stop();
                Err(err)
            }
        }
    }

    pub fn read(&self) -> Result<SampleBuffer> {
        self.reader.read()
    }

    pub fn read_timeout(&self, timeout: Duration) -> Result<Option<SampleBuffer>> {
        self.reader.read_timeout(timeout)
    }

    pub fn try_read(&self) -> Result<Option<SampleBuffer>> {
        self.reader.try_read()
    }

    pub fn release(&self, buffer: SampleBuffer) -> Result<()> {
        self.reader.release(buffer)
    }

    /// A handle for reading from another thread
    pub fn reader(&self) -> StreamReader {
        self.reader.clone()
    }

    pub fn state(&self) -> StreamState {
        self.reader.state()
    }

    pub fn stats(&self) -> StreamStats {
        self.reader.stats()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Stop the stream.
    ///
    /// Queued ready buffers are dropped, blocked readers are woken with
    /// [`Error::Stopped`], and every in-flight transfer is cancelled. Waits
    /// up to the drain timeout for the cancellations to come back; past it
    /// the outstanding slots are reclaimed anyway and
    /// [`Error::DrainTimeout`] is returned. Buffers still lent to the
    /// consumer may be released afterwards. Calling `stop` again is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let shared = Arc::clone(&self.reader.shared);

        {
            let mut inner = shared.lock();
            inner.state = StreamState::Stopping;
            let flushed = inner.pool.discard_ready();
            inner.counters.discarded += flushed as u64;
            debug!("stopping stream, {} queued buffer(s) dropped", flushed);
            shared.ready.notify_all();
        }

        if let Err(err) = self.reader.transport.cancel_all() {
            warn!("cancel failed: {}", err);
        }

        let result = {
            let deadline = Instant::now().checked_add(self.config.drain_timeout);
            let mut inner = shared.lock();
            let result = loop {
                let outstanding = inner.pool.submitted();
                if outstanding == 0 {
                    break Ok(());
                }
                let Some(deadline) = deadline else {
                    inner = shared
                        .drained
                        .wait(inner)
                        .unwrap_or_else(PoisonError::into_inner);
                    continue;
                };
                let now = Instant::now();
                if now >= deadline {
                    let reclaimed = inner.pool.abandon_in_flight();
                    warn!(
                        "drain timed out after {:?}, reclaimed {} buffer(s)",
                        self.config.drain_timeout, reclaimed
                    );
                    break Err(Error::DrainTimeout { outstanding });
                }
                inner = shared
                    .drained
                    .wait_timeout(inner, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            };
            inner.state = StreamState::Stopped;
            shared.ready.notify_all();
            result
        };

        self.sink.shutdown();
        if worker.join().is_err() {
            warn!("completion thread panicked");
        }
        self.streaming.store(false, Ordering::Release);
        info!("stream stopped");
        result
    }
}

impl Drop for StreamingEngine {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("stream stopped uncleanly: {}", err);
        }
    }
}

impl std::fmt::Debug for StreamingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingEngine")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
