//! libusb-backed USB subsystem
//!
//! Wraps an owned `rusb::Context`. The descriptor interest list is not part of
//! rusb's safe API, so [`LibusbSubsystem::poll_fds`] reads it through
//! `rusb::ffi`.

use super::device::device_info;
use super::{UsbPollFd, UsbSubsystem};
use nix::poll::PollFlags;
use protocol::DeviceInfo;
use rusb::{Context, Device, DeviceHandle, LogLevel, UsbContext};
use std::time::Duration;
use tracing::{debug, warn};

/// USB subsystem on top of libusb
pub struct LibusbSubsystem {
    context: Context,
    verbosity: u8,
}

impl LibusbSubsystem {
    /// Initialize libusb with a log level derived from the 0-5 verbosity
    pub fn new(verbosity: u8) -> Result<Self, rusb::Error> {
        let context = Self::new_context(verbosity)?;
        debug!("libusb initialized (verbosity {})", verbosity);
        Ok(Self { context, verbosity })
    }

    fn new_context(verbosity: u8) -> Result<Context, rusb::Error> {
        let mut context = Context::new()?;
        context.set_log_level(libusb_log_level(verbosity));
        Ok(context)
    }

    /// Describe every attached device
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, rusb::Error> {
        let devices = self.context.devices()?;
        let mut infos = Vec::with_capacity(devices.len());
        for device in devices.iter() {
            match device_info(&device) {
                Ok(info) => infos.push(info),
                Err(e) => warn!(
                    "Skipping device at {}-{}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }
        Ok(infos)
    }
}

impl UsbSubsystem for LibusbSubsystem {
    type Device = Device<Context>;
    type Handle = DeviceHandle<Context>;

    fn devices(&self) -> Result<Vec<Self::Device>, rusb::Error> {
        Ok(self.context.devices()?.iter().collect())
    }

    fn bus_address(&self, device: &Self::Device) -> (u8, u8) {
        (device.bus_number(), device.address())
    }

    fn open(&self, device: &Self::Device) -> Result<Self::Handle, rusb::Error> {
        device.open()
    }

    fn open_vid_pid(&self, vendor_id: u16, product_id: u16) -> Option<Self::Handle> {
        self.context.open_device_with_vid_pid(vendor_id, product_id)
    }

    fn active_configuration(&self, handle: &Self::Handle) -> Result<u8, rusb::Error> {
        handle.active_configuration()
    }

    fn poll_fds(&self) -> Vec<UsbPollFd> {
        let mut fds = Vec::new();

        // SAFETY: libusb returns a NULL-terminated array that stays valid until
        // it is handed back to libusb_free_pollfds.
        unsafe {
            let list = rusb::ffi::libusb_get_pollfds(self.context.as_raw());
            if list.is_null() {
                return fds;
            }

            let mut i = 0;
            loop {
                let entry = *list.add(i);
                if entry.is_null() {
                    break;
                }
                let events = PollFlags::from_bits_truncate((*entry).events);
                fds.push(UsbPollFd {
                    fd: (*entry).fd,
                    readable: events.contains(PollFlags::POLLIN),
                    writable: events.contains(PollFlags::POLLOUT),
                });
                i += 1;
            }

            rusb::ffi::libusb_free_pollfds(list);
        }

        fds
    }

    fn next_timeout(&self) -> Option<Duration> {
        match self.context.next_timeout() {
            Ok(timeout) => timeout,
            Err(e) => {
                debug!("libusb_get_next_timeout failed: {}", e);
                None
            }
        }
    }

    fn handle_events(&self) -> Result<(), rusb::Error> {
        self.context.handle_events(Some(Duration::ZERO))
    }

    fn reinit(&mut self) -> Result<(), rusb::Error> {
        self.context = Self::new_context(self.verbosity)?;
        debug!("libusb context re-initialized");
        Ok(())
    }
}

/// Map the 0-5 verbosity onto libusb's debug levels
fn libusb_log_level(verbosity: u8) -> LogLevel {
    match verbosity {
        0 => LogLevel::None,
        1 => LogLevel::Error,
        2 => LogLevel::Warning,
        3 => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}
