//! Async sample stream.
//!
//! A std thread reads buffers from a [`StreamReader`], converts them to
//! complex samples, releases them and forwards the samples over a tokio
//! channel, so async consumers never block on the pool.

use futures::Stream;
use num_complex::Complex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::StreamReader;
use crate::error::{Error, Result};

/// Number of converted blocks buffered ahead of the async consumer
const CHANNEL_DEPTH: usize = 32;

/**
 * Asynchronous stream of normalized I/Q samples
 *
 * Ends cleanly when the underlying stream is stopped. A fault is yielded
 * once as an error, then the stream ends.
 */
pub struct SampleStream {
    rx: mpsc::Receiver<Result<Vec<Complex<f32>>>>,
    _handle: std::thread::JoinHandle<()>,
}

impl SampleStream {
    pub fn spawn(reader: StreamReader) -> Result<Self> {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let handle = std::thread::Builder::new()
            .name("rtlstream-samples".into())
            .spawn(move || pump(reader, tx))?;
        Ok(Self {
            rx,
            _handle: handle,
        })
    }
}

fn pump(reader: StreamReader, tx: mpsc::Sender<Result<Vec<Complex<f32>>>>) {
    loop {
        let buffer = match reader.read() {
            Ok(buffer) => buffer,
            Err(Error::Stopped) => break,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                break;
            }
        };
        let samples = buffer.to_complex();
        if let Err(e) = reader.release(buffer) {
            let _ = tx.blocking_send(Err(e));
            break;
        }
        if tx.blocking_send(Ok(samples)).is_err() {
            break;
        }
    }
    debug!("sample stream finished");
}

impl Stream for SampleStream {
    type Item = Result<Vec<Complex<f32>>>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
