//! Error handling for the rtlstream library
//!
//! This module provides a unified error type for device lifecycle,
//! configuration and streaming operations. Configuration and lifecycle errors
//! are returned synchronously; faults raised on the transport's completion
//! context are recorded on the stream and surface as
//! [`Error::DeviceDisconnected`] on the next read or release.

use std::io;

use thiserror::Error;

/// A specialized Result type for rtlstream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rtlstream operations
#[derive(Debug, Error)]
pub enum Error {
    /// No device matches the selector
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device is claimed by another handle or process
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// Value outside the range reported by the hardware
    #[error("Invalid {parameter}: {value} (supported: {supported})")]
    InvalidParameter {
        parameter: &'static str,
        value: String,
        supported: String,
    },

    /// Operation not valid in the current lifecycle phase
    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Fatal transport fault; the device must be closed and reopened
    #[error("Device disconnected: {0}")]
    DeviceDisconnected(String),

    /// `stop` exceeded its drain grace period
    #[error("Drain timeout: {outstanding} transfer(s) still outstanding")]
    DrainTimeout { outstanding: usize },

    /// No buffer became ready within the configured read timeout
    #[error("Read timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The stream was stopped; terminal result for blocked readers
    #[error("Stream stopped")]
    Stopped,

    /// A released buffer does not belong to a lent slot of this stream
    #[error("Stale buffer: slot {slot}, sequence {sequence}")]
    StaleBuffer { slot: usize, sequence: u64 },

    /// The backend does not offer this control
    #[error("Unsupported by this device: {0}")]
    Unsupported(&'static str),

    /// Control transfer or driver failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error (capture files, thread spawning)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(feature = "rtlsdr")]
impl From<rtl_sdr_rs::error::RtlsdrError> for Error {
    fn from(err: rtl_sdr_rs::error::RtlsdrError) -> Self {
        Error::Transport(err.to_string())
    }
}

#[cfg(feature = "rtlsdr")]
impl From<rs_rtl::Error> for Error {
    fn from(err: rs_rtl::Error) -> Self {
        match err {
            rs_rtl::Error::DeviceNotFound(index) => Error::DeviceNotFound(format!("index {}", index)),
            rs_rtl::Error::DeviceBusy(index) => Error::DeviceBusy(format!("index {}", index)),
            rs_rtl::Error::Usb(rusb_err) => {
                let code = rs_rtl::RtlErrorCode::from(&rusb_err);
                Error::Transport(format!("{} ({})", rusb_err, code.name()))
            }
        }
    }
}

// Helper constructors for common error scenarios

impl Error {
    /// Create an invalid parameter error
    pub fn invalid_parameter<V, S>(parameter: &'static str, value: V, supported: S) -> Self
    where
        V: ToString,
        S: Into<String>,
    {
        Error::InvalidParameter {
            parameter,
            value: value.to_string(),
            supported: supported.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state<S: ToString>(operation: &'static str, state: S) -> Self {
        Error::InvalidState {
            operation,
            state: state.to_string(),
        }
    }

    /// Create a transport error with a custom message
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Error::Transport(msg.into())
    }

    /// Whether the error requires closing and reopening the device
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::DeviceDisconnected(_))
    }
}
