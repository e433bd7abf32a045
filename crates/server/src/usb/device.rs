//! Opened USB device with claimed interfaces
//!
//! [`ClaimedDevice`] takes ownership of an open handle, detaches kernel
//! drivers and claims every interface of the active configuration. Dropping it
//! releases the interfaces and hands them back to the kernel.

use protocol::{DeviceInfo, DeviceSpeed};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use tracing::{debug, warn};

/// USB device handle bound to a redirection host
pub struct ClaimedDevice {
    handle: DeviceHandle<Context>,
    info: DeviceInfo,
    /// Interfaces claimed by us
    claimed_interfaces: Vec<u8>,
}

impl ClaimedDevice {
    /// Detach kernel drivers and claim all interfaces of the active configuration
    pub fn claim(handle: DeviceHandle<Context>) -> Result<Self, rusb::Error> {
        let device = handle.device();
        let mut info = device_info(&device)?;
        let (manufacturer, product, serial_number) = read_string_descriptors(&handle, &device);
        info.manufacturer = manufacturer;
        info.product = product;
        info.serial_number = serial_number;

        let mut claimed = Self {
            handle,
            info,
            claimed_interfaces: Vec::new(),
        };
        claimed.claim_all()?;
        Ok(claimed)
    }

    fn claim_all(&mut self) -> Result<(), rusb::Error> {
        let config = self.handle.device().active_config_descriptor()?;
        let interfaces: Vec<u8> = config.interfaces().map(|i| i.number()).collect();

        for interface_number in interfaces {
            match self.handle.kernel_driver_active(interface_number) {
                Ok(true) => {
                    debug!(
                        "Detaching kernel driver from interface {}",
                        interface_number
                    );
                    if let Err(e) = self.handle.detach_kernel_driver(interface_number) {
                        warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            interface_number, e
                        );
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(
                        "Could not check kernel driver status for interface {}: {}",
                        interface_number, e
                    );
                }
            }

            // Interfaces claimed so far are released by release_all via Drop
            self.handle.claim_interface(interface_number).map_err(|e| {
                warn!("Failed to claim interface {}: {}", interface_number, e);
                e
            })?;
            debug!("Claimed interface {}", interface_number);
            self.claimed_interfaces.push(interface_number);
        }

        Ok(())
    }

    fn release_all(&mut self) {
        for interface in self.claimed_interfaces.drain(..) {
            if let Err(e) = self.handle.release_interface(interface) {
                debug!("Failed to release interface {}: {}", interface, e);
            }
            if let Err(e) = self.handle.attach_kernel_driver(interface) {
                debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    interface, e
                );
            }
        }
    }

    /// Switch configuration, re-claiming the interfaces of the new one
    pub fn set_configuration(&mut self, configuration: u8) -> Result<(), rusb::Error> {
        self.release_all();
        self.handle.set_active_configuration(configuration)?;
        self.claim_all()
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn handle(&self) -> &DeviceHandle<Context> {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut DeviceHandle<Context> {
        &mut self.handle
    }
}

impl Drop for ClaimedDevice {
    fn drop(&mut self) {
        self.release_all();
        debug!(
            "Released device {}-{}",
            self.info.bus_number, self.info.device_address
        );
    }
}

/// Descriptor-level description of an enumerated device
///
/// String descriptors need an open handle and are left empty here.
pub fn device_info<T: UsbContext>(device: &Device<T>) -> Result<DeviceInfo, rusb::Error> {
    let descriptor = device.device_descriptor()?;
    let version = descriptor.device_version();

    Ok(DeviceInfo {
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        bus_number: device.bus_number(),
        device_address: device.address(),
        class: descriptor.class_code(),
        subclass: descriptor.sub_class_code(),
        protocol: descriptor.protocol_code(),
        speed: map_device_speed(device.speed()),
        device_version_bcd: bcd_version(version.major(), version.minor(), version.sub_minor()),
        manufacturer: None,
        product: None,
        serial_number: None,
    })
}

fn read_string_descriptors<T: UsbContext>(
    handle: &DeviceHandle<T>,
    device: &Device<T>,
) -> (Option<String>, Option<String>, Option<String>) {
    let Ok(descriptor) = device.device_descriptor() else {
        return (None, None, None);
    };

    let manufacturer = descriptor
        .manufacturer_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
    let product = descriptor
        .product_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
    let serial_number = descriptor
        .serial_number_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    (manufacturer, product, serial_number)
}

/// Pack a decoded bcdDevice back into its wire form
fn bcd_version(major: u8, minor: u8, sub_minor: u8) -> u16 {
    let major_bcd = ((major / 10) << 4) | (major % 10);
    ((major_bcd as u16) << 8) | (((minor & 0x0f) as u16) << 4) | (sub_minor & 0x0f) as u16
}

/// Map rusb device speed to protocol DeviceSpeed
fn map_device_speed(speed: rusb::Speed) -> DeviceSpeed {
    match speed {
        rusb::Speed::Low => DeviceSpeed::Low,
        rusb::Speed::Full => DeviceSpeed::Full,
        rusb::Speed::High => DeviceSpeed::High,
        rusb::Speed::Super => DeviceSpeed::Super,
        rusb::Speed::SuperPlus => DeviceSpeed::SuperPlus,
        _ => DeviceSpeed::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_device_speed() {
        assert_eq!(map_device_speed(rusb::Speed::Low), DeviceSpeed::Low);
        assert_eq!(map_device_speed(rusb::Speed::High), DeviceSpeed::High);
        assert_eq!(
            map_device_speed(rusb::Speed::SuperPlus),
            DeviceSpeed::SuperPlus
        );
        assert_eq!(map_device_speed(rusb::Speed::Unknown), DeviceSpeed::Unknown);
    }

    #[test]
    fn test_bcd_version_packing() {
        assert_eq!(bcd_version(2, 0, 0), 0x0200);
        assert_eq!(bcd_version(1, 1, 0), 0x0110);
        assert_eq!(bcd_version(12, 3, 4), 0x1234);
    }
}
