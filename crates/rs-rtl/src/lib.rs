//! USB plumbing for RTL2832U based Software Defined Radios.
//!
//! # Overview
//!
//! `rs-rtl` knows which USB devices are RTL2832U dongles, enumerates them
//! through an explicit [`UsbRegistry`] (one `rusb` context per registry, no
//! process-wide state), and maps USB failures onto the integer codes librtlsdr
//! returns so diagnostics line up with the C tools.
//!
//! Tuner programming and bulk streaming are left to the driver that sits on
//! top of this crate.
//!
//! # Example
//!
//! ```no_run
//! use rs_rtl::UsbRegistry;
//!
//! let registry = UsbRegistry::new()?;
//! for device in registry.devices()? {
//!     println!("[{}] {} (SN: {})", device.index, device.name, device.serial);
//! }
//! # Ok::<(), rs_rtl::Error>(())
//! ```

pub mod error;
pub mod usb;

pub use error::{Error, Result, RtlErrorCode};
pub use usb::{UsbDeviceInfo, UsbRegistry};

/// Realtek vendor ID used by the reference RTL2832U designs.
pub const REALTEK_VID: u16 = 0x0bda;

/// A USB VID/PID pair known to carry an RTL2832U demodulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: &'static str,
}

const fn known(vendor_id: u16, product_id: u16, name: &'static str) -> KnownDevice {
    KnownDevice {
        vendor_id,
        product_id,
        name,
    }
}

/// Dongles recognised by librtlsdr.
pub const KNOWN_DEVICES: &[KnownDevice] = &[
    known(0x0bda, 0x2832, "Generic RTL2832U"),
    known(0x0bda, 0x2838, "Generic RTL2832U OEM"),
    known(0x0413, 0x6680, "DigitalNow Quad DVB-T PCI-E card"),
    known(0x0413, 0x6f0f, "Leadtek WinFast DTV Dongle mini D"),
    known(0x0458, 0x707f, "Genius TVGo DVB-T03 USB dongle (Ver. B)"),
    known(0x0ccd, 0x00a9, "Terratec Cinergy T Stick Black (rev 1)"),
    known(0x0ccd, 0x00b3, "Terratec NOXON DAB/DAB+ USB dongle (rev 1)"),
    known(0x0ccd, 0x00d3, "Terratec Cinergy T Stick RC (Rev.3)"),
    known(0x0ccd, 0x00d7, "Terratec T Stick PLUS"),
    known(0x0ccd, 0x00e0, "Terratec NOXON DAB/DAB+ USB dongle (rev 2)"),
    known(0x1554, 0x5020, "PixelView PV-DT235U(RN)"),
    known(0x15f4, 0x0131, "Astrometa DVB-T/DVB-T2"),
    known(0x185b, 0x0620, "Compro Videomate U620F"),
    known(0x185b, 0x0650, "Compro Videomate U650F"),
    known(0x1b80, 0xd393, "GIGABYTE GT-U7300"),
    known(0x1b80, 0xd394, "DIKOM USB-DVBT HD"),
    known(0x1b80, 0xd397, "KWorld KW-UB450-T USB DVB-T Pico TV"),
    known(0x1b80, 0xd39d, "SVEON STV20 DVB-T USB & FM"),
    known(0x1b80, 0xd3a4, "Twintech UT-40"),
    known(0x1d19, 0x1101, "Dexatek DK DVB-T Dongle (Logilink VG0002A)"),
    known(0x1d19, 0x1102, "Dexatek DK DVB-T Dongle (MSI DigiVox mini II V3.0)"),
    known(0x1d19, 0x1104, "MSI DigiVox Micro HD"),
    known(0x1f4d, 0xa803, "Sweex DVB-T USB"),
    known(0x1f4d, 0xb803, "GTek T803"),
    known(0x1f4d, 0xd286, "MyGica TD312"),
];

/// Look up a VID/PID pair in [`KNOWN_DEVICES`].
pub fn find_known_device(vendor_id: u16, product_id: u16) -> Option<&'static KnownDevice> {
    KNOWN_DEVICES
        .iter()
        .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
}
