//! Device locator
//!
//! Resolves a [`DeviceIdentity`] against the live device list. Absence is an
//! ordinary outcome (it recurs on every poll while waiting for a device), so
//! it is logged and reported as `None` rather than as an error.

use super::UsbSubsystem;
use common::DeviceIdentity;
use tracing::{debug, info};

/// Open the device named by `identity`, if it is attached
///
/// Bus/address identities scan the enumerated list; vendor/product
/// identities go straight to an open-by-id and never enumerate.
pub fn locate<U: UsbSubsystem>(usb: &U, identity: &DeviceIdentity) -> Option<U::Handle> {
    match *identity {
        DeviceIdentity::VendorProduct {
            vendor_id,
            product_id,
        } => {
            let handle = usb.open_vid_pid(vendor_id, product_id);
            if handle.is_none() {
                info!(
                    "Could not open an usb-device with vid:pid {:04x}:{:04x}",
                    vendor_id, product_id
                );
            }
            handle
        }
        DeviceIdentity::BusAddress { bus, address } => {
            let devices = match usb.devices() {
                Ok(devices) => devices,
                Err(e) => {
                    info!("Could not enumerate usb devices: {}", e);
                    return None;
                }
            };

            let Some(device) = devices
                .iter()
                .find(|d| usb.bus_address(d) == (bus, address))
            else {
                info!("Could not find an usb-device at bus-addr {}-{}", bus, address);
                return None;
            };

            match usb.open(device) {
                Ok(handle) => {
                    debug!("Opened usb-device at bus-addr {}-{}", bus, address);
                    Some(handle)
                }
                Err(e) => {
                    info!(
                        "Could not open usb-device at bus-addr {}-{}: {}",
                        bus, address, e
                    );
                    None
                }
            }
        }
    }
}
