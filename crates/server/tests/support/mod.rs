//! In-memory USB subsystem and redirection host for engine tests
//!
//! Both fakes share their observable state through `Rc` handles so a test
//! keeps a view of what the engine did after handing the fakes over.

#![allow(dead_code)]

use common::DeviceIdentity;
use protocol::Caps;
use server::host::{HostFactory, OpenFlags, RedirHost};
use server::usb::{UsbPollFd, UsbSubsystem};
use server::{GuestIo, SessionOptions, ShutdownToken};
use std::cell::{Cell, RefCell};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

/// Bytes the fake host pulls per read call, small so one wake spans many reads
const HOST_READ_CHUNK: usize = 7;

#[derive(Debug, Default)]
pub struct UsbState {
    /// Device (1-4, 1234:abcd) attached
    pub present: Cell<bool>,
    /// Liveness probe reports the device gone
    pub probe_fails: Cell<bool>,
    /// Re-initialising the library fails
    pub reinit_fails: Cell<bool>,
    /// The device is unplugged when the library is re-initialised
    pub vanish_on_reinit: Cell<bool>,
    pub enumerations: Cell<u32>,
    pub probes: Cell<u32>,
    pub reinits: Cell<u32>,
    pub event_rounds: Cell<u32>,
    opened: Cell<u32>,
}

pub struct FakeUsb {
    pub state: Rc<UsbState>,
}

impl FakeUsb {
    pub fn with_device() -> Self {
        let usb = Self {
            state: Rc::default(),
        };
        usb.state.present.set(true);
        usb
    }

    pub fn without_device() -> Self {
        Self {
            state: Rc::default(),
        }
    }

    fn next_handle(&self) -> u32 {
        let handle = self.state.opened.get() + 1;
        self.state.opened.set(handle);
        handle
    }
}

impl UsbSubsystem for FakeUsb {
    type Device = (u8, u8);
    /// Handle generation, starting at 1
    type Handle = u32;

    fn devices(&self) -> Result<Vec<Self::Device>, rusb::Error> {
        self.state.enumerations.set(self.state.enumerations.get() + 1);
        Ok(if self.state.present.get() {
            vec![(1, 4)]
        } else {
            Vec::new()
        })
    }

    fn bus_address(&self, device: &Self::Device) -> (u8, u8) {
        *device
    }

    fn open(&self, _device: &Self::Device) -> Result<Self::Handle, rusb::Error> {
        Ok(self.next_handle())
    }

    fn open_vid_pid(&self, vendor_id: u16, product_id: u16) -> Option<Self::Handle> {
        (self.state.present.get() && (vendor_id, product_id) == (0x1234, 0xabcd))
            .then(|| self.next_handle())
    }

    fn active_configuration(&self, _handle: &Self::Handle) -> Result<u8, rusb::Error> {
        self.state.probes.set(self.state.probes.get() + 1);
        if self.state.probe_fails.get() {
            Err(rusb::Error::NoDevice)
        } else {
            Ok(1)
        }
    }

    fn poll_fds(&self) -> Vec<UsbPollFd> {
        Vec::new()
    }

    fn next_timeout(&self) -> Option<Duration> {
        None
    }

    fn handle_events(&self) -> Result<(), rusb::Error> {
        self.state.event_rounds.set(self.state.event_rounds.get() + 1);
        Ok(())
    }

    fn reinit(&mut self) -> Result<(), rusb::Error> {
        self.state.reinits.set(self.state.reinits.get() + 1);
        if self.state.reinit_fails.get() {
            return Err(rusb::Error::Other);
        }
        if self.state.vanish_on_reinit.get() {
            self.state.present.set(false);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Opened { handle: u32, flags: OpenFlags },
    Disconnected { handle: u32 },
    Restored { handle: u32, caps: Caps },
    Closed { handle: u32, caps: Caps },
}

#[derive(Debug, Default)]
pub struct HostLog {
    pub events: RefCell<Vec<HostEvent>>,
    /// Everything any host read from the transport, in order
    pub received: RefCell<Vec<u8>>,
    pub write_calls: Cell<u32>,
}

impl HostLog {
    pub fn events(&self) -> Vec<HostEvent> {
        self.events.borrow().clone()
    }

    pub fn opens(&self) -> Vec<OpenFlags> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                HostEvent::Opened { flags, .. } => Some(*flags),
                _ => None,
            })
            .collect()
    }
}

pub struct FakeHost {
    handle: u32,
    log: Rc<HostLog>,
    outbound: Vec<u8>,
    disconnected: bool,
    caps: Caps,
    disconnect_on: Option<u8>,
}

impl RedirHost for FakeHost {
    type Handle = u32;

    fn device(&self) -> &Self::Handle {
        &self.handle
    }

    fn has_data_to_write(&self) -> bool {
        !self.outbound.is_empty()
    }

    fn read_guest_data(&mut self, io: &mut dyn GuestIo) -> common::Result<()> {
        let mut buf = [0u8; HOST_READ_CHUNK];
        loop {
            let n = io.read_guest(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            self.log.received.borrow_mut().extend_from_slice(&buf[..n]);
            if let Some(trigger) = self.disconnect_on
                && buf[..n].contains(&trigger)
            {
                self.disconnect();
            }
        }
    }

    fn write_guest_data(&mut self, io: &mut dyn GuestIo) -> common::Result<()> {
        self.log.write_calls.set(self.log.write_calls.get() + 1);
        while !self.outbound.is_empty() {
            let n = io.write_guest(&self.outbound)?;
            if n == 0 {
                break;
            }
            self.outbound.drain(..n);
        }
        Ok(())
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn disconnect(&mut self) {
        if !self.disconnected {
            self.disconnected = true;
            self.log.events.borrow_mut().push(HostEvent::Disconnected {
                handle: self.handle,
            });
        }
    }

    fn save_caps(&self) -> Caps {
        self.caps
    }

    fn restore_caps_and_send_device_connect(&mut self, caps: &Caps) {
        self.caps = *caps;
        self.log.events.borrow_mut().push(HostEvent::Restored {
            handle: self.handle,
            caps: *caps,
        });
    }
}

impl Drop for FakeHost {
    fn drop(&mut self) {
        self.log.events.borrow_mut().push(HostEvent::Closed {
            handle: self.handle,
            caps: self.caps,
        });
    }
}

pub struct FakeFactory {
    pub log: Rc<HostLog>,
    /// Queued by a host opened with a greeting
    pub greeting: Vec<u8>,
    /// Capabilities a freshly greeted host reports as negotiated
    pub negotiated: Caps,
    /// Cancel this token once this many hosts have been opened
    pub cancel_after: Option<(usize, ShutdownToken)>,
    /// Receiving this byte makes a host see its device vanish, as a failed
    /// transfer would
    pub disconnect_on: Option<u8>,
    /// Opening a host without a greeting fails
    pub fail_reopen: bool,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self {
            log: Rc::default(),
            greeting: Vec::new(),
            negotiated: Caps::from_words([0b11]),
            cancel_after: None,
            disconnect_on: None,
            fail_reopen: false,
        }
    }
}

impl HostFactory for FakeFactory {
    type Host = FakeHost;

    fn open(&mut self, handle: u32, flags: OpenFlags) -> common::Result<FakeHost> {
        self.log
            .events
            .borrow_mut()
            .push(HostEvent::Opened { handle, flags });

        if let Some((limit, token)) = &self.cancel_after
            && self.log.opens().len() >= *limit
        {
            token.cancel();
        }

        if flags.no_hello && self.fail_reopen {
            return Err(common::Error::Usb("could not open host".into()));
        }

        let (outbound, caps) = if flags.no_hello {
            (Vec::new(), Caps::default())
        } else {
            (self.greeting.clone(), self.negotiated)
        };
        Ok(FakeHost {
            handle,
            log: Rc::clone(&self.log),
            outbound,
            disconnected: false,
            caps,
            disconnect_on: self.disconnect_on,
        })
    }
}

pub fn options(device: &str, wait_mode: bool) -> SessionOptions {
    options_with_timeout(device, wait_mode, Duration::from_millis(50))
}

pub fn options_with_timeout(device: &str, wait_mode: bool, wait_timeout: Duration) -> SessionOptions {
    let identity: DeviceIdentity = device.parse().expect("valid device id");
    SessionOptions {
        identity,
        wait_mode,
        wait_timeout,
    }
}

/// Non-blocking server end wrapped as a transport, plus the guest's end
pub fn connection() -> (server::TransportChannel<UnixStream>, UnixStream) {
    let (ours, guest) = UnixStream::pair().expect("socket pair");
    ours.set_nonblocking(true).expect("non-blocking");
    (server::TransportChannel::new(ours, "guest"), guest)
}
