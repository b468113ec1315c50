//! USB enumeration for RTL2832U devices.

use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, UsbContext};

use crate::error::{Error, Result};
use crate::{KnownDevice, find_known_device};

/// Timeout for string descriptor reads.
const USB_TIMEOUT: Duration = Duration::from_millis(500);

/// Interface carrying the RTL2832U bulk endpoint.
const INTERFACE: u8 = 0;

/// One enumerated dongle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    /// Zero-based index among RTL2832U devices (librtlsdr ordering).
    pub index: usize,
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Name from the known-devices table.
    pub name: &'static str,
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
}

/// Owns a `rusb` context and enumerates RTL2832U devices on it.
///
/// Each registry has its own libusb context, so two registries in the same
/// process never share enumeration state. The context is torn down when the
/// registry is dropped.
pub struct UsbRegistry {
    context: Context,
}

impl std::fmt::Debug for UsbRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbRegistry").finish_non_exhaustive()
    }
}

impl UsbRegistry {
    /// Initialise a fresh libusb context.
    pub fn new() -> Result<Self> {
        let context = Context::new()?;
        Ok(Self { context })
    }

    /// Number of attached RTL2832U devices.
    pub fn device_count(&self) -> Result<usize> {
        Ok(self.known_devices()?.len())
    }

    /// List attached RTL2832U devices with their USB strings.
    ///
    /// Devices that cannot be opened (permissions, claimed elsewhere) are
    /// still listed, with placeholder strings.
    pub fn devices(&self) -> Result<Vec<UsbDeviceInfo>> {
        let mut result = Vec::new();

        for (index, (device, known)) in self.known_devices()?.into_iter().enumerate() {
            let mut info = UsbDeviceInfo {
                index,
                bus: device.bus_number(),
                address: device.address(),
                vendor_id: known.vendor_id,
                product_id: known.product_id,
                name: known.name,
                manufacturer: format!("VID:{:04x}", known.vendor_id),
                product: format!("PID:{:04x}", known.product_id),
                serial: format!("Unknown-{}", index),
            };

            match device.open() {
                Ok(handle) => read_strings(&device, &handle, &mut info),
                Err(e) => {
                    tracing::debug!("Cannot open device {} to read strings: {}", index, e);
                }
            }

            result.push(info);
        }

        Ok(result)
    }

    /// Check that the device at `index` can be claimed by this process.
    ///
    /// Follows the librtlsdr open sequence: open the device, detach the DVB
    /// kernel driver if bound (Linux only), claim interface 0, then release
    /// it again so the streaming driver can take over.
    pub fn probe(&self, index: usize) -> Result<()> {
        let (device, _) = self
            .known_devices()?
            .into_iter()
            .nth(index)
            .ok_or(Error::DeviceNotFound(index))?;

        let handle = device.open().map_err(|e| match e {
            rusb::Error::Busy | rusb::Error::Access => Error::DeviceBusy(index),
            other => Error::Usb(other),
        })?;

        #[cfg(target_os = "linux")]
        {
            if handle.kernel_driver_active(INTERFACE).unwrap_or(false) {
                tracing::debug!("Detaching kernel driver from interface {}", INTERFACE);
                if let Err(e) = handle.detach_kernel_driver(INTERFACE) {
                    tracing::warn!("Failed to detach kernel driver: {}", e);
                }
            }
        }

        match handle.claim_interface(INTERFACE) {
            Ok(()) => {}
            Err(rusb::Error::Busy) => return Err(Error::DeviceBusy(index)),
            Err(e) => return Err(Error::Usb(e)),
        }

        if let Err(e) = handle.release_interface(INTERFACE) {
            tracing::debug!("Failed to release USB interface: {}", e);
        }

        Ok(())
    }

    fn known_devices(&self) -> Result<Vec<(Device<Context>, &'static KnownDevice)>> {
        let mut result = Vec::new();

        for device in self.context.devices()?.iter() {
            let desc = match device.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };

            if let Some(known) = find_known_device(desc.vendor_id(), desc.product_id()) {
                result.push((device, known));
            }
        }

        Ok(result)
    }
}

fn read_strings(device: &Device<Context>, handle: &DeviceHandle<Context>, info: &mut UsbDeviceInfo) {
    let Ok(desc) = device.device_descriptor() else {
        return;
    };
    let Ok(languages) = handle.read_languages(USB_TIMEOUT) else {
        return;
    };
    let Some(language) = languages.first().copied() else {
        return;
    };

    if let Ok(s) = handle.read_manufacturer_string(language, &desc, USB_TIMEOUT) {
        info.manufacturer = s;
    }
    if let Ok(s) = handle.read_product_string(language, &desc, USB_TIMEOUT) {
        info.product = s;
    }
    if let Ok(s) = handle.read_serial_number_string(language, &desc, USB_TIMEOUT) {
        info.serial = s;
    }
}
