//! USB subsystem
//!
//! The event loop only talks to the USB library through [`UsbSubsystem`]:
//! device enumeration and opening, the liveness probe, the descriptors the
//! library wants watched, its next timeout, and event servicing. The rusb
//! implementation lives in [`context`]; tests substitute in-memory fakes.

pub mod context;
pub mod device;
pub mod locator;
pub mod transfers;

use std::os::fd::RawFd;
use std::time::Duration;

pub use context::LibusbSubsystem;
pub use device::ClaimedDevice;
pub use locator::locate;

/// One descriptor the USB library wants watched, with its interest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbPollFd {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
}

/// Raw USB primitives the engine drives
pub trait UsbSubsystem {
    /// An enumerated, not yet opened device
    type Device;
    /// An opened device
    type Handle;

    /// Live device list; never cached between calls
    fn devices(&self) -> Result<Vec<Self::Device>, rusb::Error>;

    /// `(bus number, device address)` of an enumerated device
    fn bus_address(&self, device: &Self::Device) -> (u8, u8);

    fn open(&self, device: &Self::Device) -> Result<Self::Handle, rusb::Error>;

    /// Open the first device matching vendor and product id
    fn open_vid_pid(&self, vendor_id: u16, product_id: u16) -> Option<Self::Handle>;

    /// Current configuration value, used as a liveness probe
    fn active_configuration(&self, handle: &Self::Handle) -> Result<u8, rusb::Error>;

    /// Descriptors to watch this iteration; the set changes as transfers come
    /// and go, so callers fetch it every time
    fn poll_fds(&self) -> Vec<UsbPollFd>;

    /// Time until the library needs servicing for timeouts, if any
    fn next_timeout(&self) -> Option<Duration>;

    /// Service pending events without blocking
    fn handle_events(&self) -> Result<(), rusb::Error>;

    /// Tear down the library context and create a fresh one
    fn reinit(&mut self) -> Result<(), rusb::Error>;
}
