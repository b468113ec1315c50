//! Device enumeration and claiming.
//!
//! A [`DeviceRegistry`] wraps one [`Driver`] and tracks which devices this
//! process currently holds open. It is an ordinary value: create one per
//! backend, drop it to tear the backend down.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::device::DeviceHandle;
use crate::error::{Error, Result};
use crate::transport::Driver;

/// Device information as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device index (0-based, enumeration order)
    pub index: usize,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Manufacturer name
    pub manufacturer: String,
    /// Product name
    pub product: String,
    /// Serial number
    pub serial: String,
    /// Name from the known-devices table
    pub name: String,
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} ({:04x}:{:04x}) {}, {}, SN: {}",
            self.index,
            self.name,
            self.vendor_id,
            self.product_id,
            self.manufacturer,
            self.product,
            self.serial
        )
    }
}

/**
 * Device selector
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Select device by index (0 for first device)
    Index(usize),
    /// Select device by serial number
    Serial(String),
    /// Select device by filters (manufacturer, product, serial)
    /// All provided filters must match
    Filter {
        manufacturer: Option<String>,
        product: Option<String>,
        serial: Option<String>,
    },
}

impl Default for DeviceSelector {
    fn default() -> Self {
        DeviceSelector::Index(0)
    }
}

impl DeviceSelector {
    pub fn matches(&self, info: &DeviceInfo) -> bool {
        match self {
            DeviceSelector::Index(index) => info.index == *index,
            DeviceSelector::Serial(serial) => info.serial == *serial,
            DeviceSelector::Filter {
                manufacturer,
                product,
                serial,
            } => {
                let manufacturer_match = manufacturer
                    .as_ref()
                    .is_none_or(|m| info.manufacturer == *m);
                let product_match = product.as_ref().is_none_or(|p| info.product == *p);
                let serial_match = serial.as_ref().is_none_or(|s| info.serial == *s);
                manufacturer_match && product_match && serial_match
            }
        }
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSelector::Index(index) => write!(f, "index {}", index),
            DeviceSelector::Serial(serial) => write!(f, "serial {}", serial),
            DeviceSelector::Filter {
                manufacturer,
                product,
                serial,
            } => write!(
                f,
                "manufacturer={:?}, product={:?}, serial={:?}",
                manufacturer, product, serial
            ),
        }
    }
}

impl std::str::FromStr for DeviceSelector {
    type Err = Error;

    /// A bare number selects by index, anything else by serial
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::invalid_parameter(
                "device selector",
                s,
                "device index or serial number",
            ));
        }
        Ok(match s.parse::<usize>() {
            Ok(index) => DeviceSelector::Index(index),
            Err(_) => DeviceSelector::Serial(s.to_string()),
        })
    }
}

type ClaimSet = Arc<Mutex<HashSet<usize>>>;

/// Registry claim on one device index, released on drop.
pub(crate) struct Claim {
    index: usize,
    claimed: ClaimSet,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.index);
        debug!("released claim on device {}", self.index);
    }
}

/**
 * Enumerates devices of one backend and opens them
 */
pub struct DeviceRegistry {
    driver: Arc<dyn Driver>,
    claimed: ClaimSet,
}

impl DeviceRegistry {
    pub fn new<D: Driver + 'static>(driver: D) -> Self {
        Self::with_driver(Arc::new(driver))
    }

    pub fn with_driver(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            claimed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Registry over the RTL2832U dongles attached to this machine
    #[cfg(feature = "rtlsdr")]
    pub fn usb() -> Result<Self> {
        Ok(Self::new(crate::rtlsdr::RtlSdrDriver::new()?))
    }

    /// List all available devices
    pub fn devices(&self) -> Result<Vec<DeviceInfo>> {
        self.driver.enumerate()
    }

    pub fn device_count(&self) -> Result<usize> {
        Ok(self.devices()?.len())
    }

    /// First device matching `selector`
    pub fn find(&self, selector: &DeviceSelector) -> Result<DeviceInfo> {
        self.devices()?
            .into_iter()
            .find(|info| selector.matches(info))
            .ok_or_else(|| Error::DeviceNotFound(selector.to_string()))
    }

    /// Locate, claim and open a device.
    ///
    /// The device is reset to the factory tuner state. Fails with
    /// [`Error::DeviceNotFound`] if nothing matches and with
    /// [`Error::DeviceBusy`] if the device is already open, here or in
    /// another process.
    pub fn open(&self, selector: &DeviceSelector) -> Result<DeviceHandle> {
        let info = self.find(selector)?;

        let claim = {
            let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
            if !claimed.insert(info.index) {
                return Err(Error::DeviceBusy(info.to_string()));
            }
            Claim {
                index: info.index,
                claimed: Arc::clone(&self.claimed),
            }
        };

        let transport = self.driver.open(&info)?;
        info!("opened {}", info);
        DeviceHandle::open(info, transport, Some(claim))
    }

    pub fn is_claimed(&self, index: usize) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&index)
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDriver;

    fn info(index: usize, serial: &str) -> DeviceInfo {
        DeviceInfo {
            index,
            vendor_id: 0x0bda,
            product_id: 0x2838,
            manufacturer: "Realtek".into(),
            product: "RTL2838UHIDIR".into(),
            serial: serial.into(),
            name: "Generic RTL2832U OEM".into(),
        }
    }

    #[test]
    fn test_selector_matching() {
        let dev = info(1, "00000002");
        assert!(DeviceSelector::Index(1).matches(&dev));
        assert!(!DeviceSelector::Index(0).matches(&dev));
        assert!(DeviceSelector::Serial("00000002".into()).matches(&dev));
        assert!(
            DeviceSelector::Filter {
                manufacturer: Some("Realtek".into()),
                product: None,
                serial: None,
            }
            .matches(&dev)
        );
        assert!(
            !DeviceSelector::Filter {
                manufacturer: Some("Realtek".into()),
                product: Some("Blog V4".into()),
                serial: None,
            }
            .matches(&dev)
        );
    }

    #[test]
    fn test_selector_from_str() {
        assert_eq!("2".parse::<DeviceSelector>().unwrap(), DeviceSelector::Index(2));
        assert_eq!(
            "ADSB01".parse::<DeviceSelector>().unwrap(),
            DeviceSelector::Serial("ADSB01".into())
        );
        assert!("".parse::<DeviceSelector>().is_err());
    }

    #[test]
    fn test_open_claims_until_closed() {
        let registry = DeviceRegistry::new(SimDriver::new(2));
        assert_eq!(registry.device_count().unwrap(), 2);

        let mut handle = registry.open(&DeviceSelector::Index(1)).unwrap();
        assert!(registry.is_claimed(1));
        assert!(matches!(
            registry.open(&DeviceSelector::Index(1)),
            Err(Error::DeviceBusy(_))
        ));

        handle.close().unwrap();
        assert!(!registry.is_claimed(1));
        assert!(registry.open(&DeviceSelector::Index(1)).is_ok());
    }

    #[test]
    fn test_open_missing_device() {
        let registry = DeviceRegistry::new(SimDriver::new(1));
        assert!(matches!(
            registry.open(&DeviceSelector::Serial("nope".into())),
            Err(Error::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_driver_busy_releases_claim() {
        let driver = SimDriver::new(1);
        driver.set_busy(0, true);
        let registry = DeviceRegistry::new(driver);
        assert!(matches!(
            registry.open(&DeviceSelector::Index(0)),
            Err(Error::DeviceBusy(_))
        ));
        assert!(!registry.is_claimed(0));
    }
}
