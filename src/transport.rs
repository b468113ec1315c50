//! Backend seam between the session layer and the USB (or simulated)
//! hardware.
//!
//! A [`Driver`] enumerates and opens devices; an opened device is a
//! [`Transport`]. Control calls are synchronous and return the value the
//! hardware actually accepted. Streaming is asynchronous: buffers handed to
//! [`Transport::submit`] come back later, on the transport's own thread,
//! through the [`CompletionSender`] registered with [`Transport::begin`].

use std::sync::Arc;

use crossbeam::channel::{Receiver, SendError, Sender};

use crate::Gain;
use crate::buffer::SampleBuffer;
use crate::capabilities::Capabilities;
use crate::error::{Error, Result};
use crate::registry::DeviceInfo;

/// Outcome of one bulk transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// The buffer was filled with samples
    Completed,
    /// The transfer was cancelled before completion
    Cancelled,
    /// The transfer failed; the device is assumed gone
    Error(String),
}

/// A buffer returned by the transport
#[derive(Debug)]
pub struct Completion {
    pub buffer: SampleBuffer,
    pub status: TransferStatus,
}

impl Completion {
    pub fn completed(buffer: SampleBuffer) -> Self {
        Self {
            buffer,
            status: TransferStatus::Completed,
        }
    }

    pub fn cancelled(buffer: SampleBuffer) -> Self {
        Self {
            buffer,
            status: TransferStatus::Cancelled,
        }
    }

    pub fn failed<S: Into<String>>(buffer: SampleBuffer, reason: S) -> Self {
        Self {
            buffer,
            status: TransferStatus::Error(reason.into()),
        }
    }
}

pub(crate) enum Event {
    Completion(Completion),
    Shutdown,
}

/// Where a transport delivers completed transfers.
#[derive(Clone)]
pub struct CompletionSender {
    tx: Sender<Event>,
}

impl CompletionSender {
    pub(crate) fn channel() -> (Self, Receiver<Event>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (Self { tx }, rx)
    }

    /// Deliver a completion. If the stream is gone the buffer is handed
    /// back to the caller.
    pub fn send(&self, completion: Completion) -> std::result::Result<(), Completion> {
        match self.tx.send(Event::Completion(completion)) {
            Err(SendError(Event::Completion(completion))) => Err(completion),
            _ => Ok(()),
        }
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(Event::Shutdown);
    }
}

impl std::fmt::Debug for CompletionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSender").finish_non_exhaustive()
    }
}

/// An opened device.
///
/// Implementations use interior mutability: the streaming engine calls
/// `submit` and `cancel_all` from its completion thread while the handle
/// keeps its own reference.
pub trait Transport: Send + Sync {
    /// Limits reported by the tuner behind this transport
    fn capabilities(&self) -> Result<Capabilities>;

    /// Tune and return the frequency the hardware reports back
    fn set_center_freq(&self, hz: u32) -> Result<u32>;

    fn set_sample_rate(&self, hz: u32) -> Result<u32>;

    fn set_gain(&self, gain: Gain) -> Result<Gain>;

    /// `0` selects automatic bandwidth
    fn set_bandwidth(&self, hz: u32) -> Result<u32>;

    fn set_freq_correction(&self, ppm: i32) -> Result<i32>;

    /// RTL2832U digital AGC
    fn set_agc(&self, enabled: bool) -> Result<()>;

    fn set_bias_tee(&self, enabled: bool) -> Result<()>;

    /// Prepare for streaming: reset the endpoint and register the completion
    /// sink for subsequent submissions.
    fn begin(&self, sink: CompletionSender) -> Result<()>;

    /// Queue a buffer for filling.
    ///
    /// Must not block and must not deliver the completion from within this
    /// call. On refusal the buffer is handed back.
    fn submit(&self, buffer: SampleBuffer) -> std::result::Result<(), (SampleBuffer, Error)>;

    /// Request cancellation of every queued transfer. Cancelled buffers are
    /// still delivered through the sink, with [`TransferStatus::Cancelled`].
    fn cancel_all(&self) -> Result<()>;

    /// Release the underlying device. Further calls may fail.
    fn release(&self) -> Result<()>;
}

/// Enumerates and opens devices of one backend.
pub trait Driver: Send + Sync {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>>;

    /// Open the device. Fails with [`Error::DeviceBusy`] if it is held
    /// elsewhere.
    fn open(&self, info: &DeviceInfo) -> Result<Arc<dyn Transport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_after_receiver_dropped_returns_buffer() {
        let (sink, rx) = CompletionSender::channel();
        drop(rx);
        let buffer = SampleBuffer::new(2, 16);
        let returned = sink.send(Completion::completed(buffer)).unwrap_err();
        assert_eq!(returned.buffer.slot(), 2);
        assert_eq!(returned.status, TransferStatus::Completed);
    }

    #[test]
    fn test_completions_arrive_in_send_order() {
        let (sink, rx) = CompletionSender::channel();
        sink.send(Completion::completed(SampleBuffer::new(0, 4))).unwrap();
        sink.send(Completion::failed(SampleBuffer::new(1, 4), "stall")).unwrap();
        sink.shutdown();

        let mut seen = Vec::new();
        for event in rx.iter() {
            match event {
                Event::Completion(c) => seen.push((c.buffer.slot(), c.status)),
                Event::Shutdown => break,
            }
        }
        assert_eq!(
            seen,
            vec![
                (0, TransferStatus::Completed),
                (1, TransferStatus::Error("stall".into()))
            ]
        );
    }
}
