//! Error types for rs-rtl operations.

use thiserror::Error;

/// Result type for rs-rtl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Return codes used by librtlsdr (it forwards libusb's negative codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RtlErrorCode {
    /// Operation successful.
    Success = 0,
    /// Input/output error.
    Io = -1,
    /// Invalid parameter.
    InvalidParam = -2,
    /// Access denied (insufficient permissions).
    Access = -3,
    /// No such device (it may have been disconnected).
    NoDevice = -4,
    /// Entity not found.
    NotFound = -5,
    /// Resource busy.
    Busy = -6,
    /// Operation timed out.
    Timeout = -7,
    /// Overflow.
    Overflow = -8,
    /// Pipe error.
    Pipe = -9,
    /// System call interrupted.
    Interrupted = -10,
    /// Insufficient memory.
    NoMem = -11,
    /// Operation not supported or unimplemented on this platform.
    NotSupported = -12,
    /// Other error.
    Other = -99,
}

impl RtlErrorCode {
    /// Get a human-readable name for the error code.
    pub fn name(self) -> &'static str {
        match self {
            RtlErrorCode::Success => "LIBUSB_SUCCESS",
            RtlErrorCode::Io => "LIBUSB_ERROR_IO",
            RtlErrorCode::InvalidParam => "LIBUSB_ERROR_INVALID_PARAM",
            RtlErrorCode::Access => "LIBUSB_ERROR_ACCESS",
            RtlErrorCode::NoDevice => "LIBUSB_ERROR_NO_DEVICE",
            RtlErrorCode::NotFound => "LIBUSB_ERROR_NOT_FOUND",
            RtlErrorCode::Busy => "LIBUSB_ERROR_BUSY",
            RtlErrorCode::Timeout => "LIBUSB_ERROR_TIMEOUT",
            RtlErrorCode::Overflow => "LIBUSB_ERROR_OVERFLOW",
            RtlErrorCode::Pipe => "LIBUSB_ERROR_PIPE",
            RtlErrorCode::Interrupted => "LIBUSB_ERROR_INTERRUPTED",
            RtlErrorCode::NoMem => "LIBUSB_ERROR_NO_MEM",
            RtlErrorCode::NotSupported => "LIBUSB_ERROR_NOT_SUPPORTED",
            RtlErrorCode::Other => "LIBUSB_ERROR_OTHER",
        }
    }

    /// Convert a raw librtlsdr return value.
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => RtlErrorCode::Success,
            -1 => RtlErrorCode::Io,
            -2 => RtlErrorCode::InvalidParam,
            -3 => RtlErrorCode::Access,
            -4 => RtlErrorCode::NoDevice,
            -5 => RtlErrorCode::NotFound,
            -6 => RtlErrorCode::Busy,
            -7 => RtlErrorCode::Timeout,
            -8 => RtlErrorCode::Overflow,
            -9 => RtlErrorCode::Pipe,
            -10 => RtlErrorCode::Interrupted,
            -11 => RtlErrorCode::NoMem,
            -12 => RtlErrorCode::NotSupported,
            _ => RtlErrorCode::Other,
        }
    }
}

impl From<&rusb::Error> for RtlErrorCode {
    fn from(err: &rusb::Error) -> Self {
        match err {
            rusb::Error::Io => RtlErrorCode::Io,
            rusb::Error::InvalidParam => RtlErrorCode::InvalidParam,
            rusb::Error::Access => RtlErrorCode::Access,
            rusb::Error::NoDevice => RtlErrorCode::NoDevice,
            rusb::Error::NotFound => RtlErrorCode::NotFound,
            rusb::Error::Busy => RtlErrorCode::Busy,
            rusb::Error::Timeout => RtlErrorCode::Timeout,
            rusb::Error::Overflow => RtlErrorCode::Overflow,
            rusb::Error::Pipe => RtlErrorCode::Pipe,
            rusb::Error::Interrupted => RtlErrorCode::Interrupted,
            rusb::Error::NoMem => RtlErrorCode::NoMem,
            rusb::Error::NotSupported => RtlErrorCode::NotSupported,
            _ => RtlErrorCode::Other,
        }
    }
}

/// Errors that can occur while enumerating or claiming dongles.
#[derive(Debug, Error)]
pub enum Error {
    /// USB operation failed.
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// No RTL2832U device at the requested index.
    #[error("No RTL-SDR device found at index {0}")]
    DeviceNotFound(usize),

    /// The device is claimed by another process or a kernel driver.
    #[error("Device {0} is busy")]
    DeviceBusy(usize),
}

impl Error {
    /// The librtlsdr return code matching this error.
    pub fn code(&self) -> RtlErrorCode {
        match self {
            Error::Usb(e) => RtlErrorCode::from(e),
            Error::DeviceNotFound(_) => RtlErrorCode::NotFound,
            Error::DeviceBusy(_) => RtlErrorCode::Busy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip_names() {
        assert_eq!(RtlErrorCode::from_raw(-6), RtlErrorCode::Busy);
        assert_eq!(RtlErrorCode::from_raw(-6).name(), "LIBUSB_ERROR_BUSY");
        assert_eq!(RtlErrorCode::from_raw(-42), RtlErrorCode::Other);
    }

    #[test]
    fn test_usb_error_mapping() {
        let err = Error::from(rusb::Error::NoDevice);
        assert_eq!(err.code(), RtlErrorCode::NoDevice);
        assert!(err.to_string().contains("USB error"));
    }

    #[test]
    fn test_busy_error() {
        let err = Error::DeviceBusy(1);
        assert_eq!(err.code() as i32, -6);
        assert_eq!(err.to_string(), "Device 1 is busy");
    }
}
