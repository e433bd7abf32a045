//! Event loop engine
//!
//! Drives one session per accepted connection on a single thread. Every
//! iteration rebuilds the readiness set, blocks in `poll`, then dispatches in
//! a fixed order:
//!
//! 1. timed wake: USB housekeeping (and nothing else outside wait mode)
//! 2. transport readable: pump inbound
//! 3. transport writable: pump outbound
//! 4. any USB descriptor ready: one round of USB event servicing
//! 5. wait mode: evaluate the reconnection state machine
//!
//! Completions found in step 4 are flushed on the next iteration.

pub mod readiness;
pub mod reconnect;

use crate::host::{HostFactory, OpenFlags, RedirHost};
use crate::shutdown::ShutdownToken;
use crate::transport::TransportChannel;
use crate::usb::{UsbSubsystem, locate};
use common::{DeviceIdentity, Error};
use nix::errno::Errno;
use readiness::ReadinessSet;
use reconnect::{ReconnectAction, ReconnectMachine};
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What the engine needs to know about the device and wait mode
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub identity: DeviceIdentity,
    /// Keep the connection across device unplug/replug
    pub wait_mode: bool,
    /// Reconnection poll interval and idle wake-up period in wait mode
    pub wait_timeout: Duration,
}

/// How a session ended without a fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The guest closed the connection
    PeerClosed,
    /// The redirection host reported an error while pumping data
    HostError,
    /// The device was not attached when the connection arrived
    DeviceNotFound,
    /// Shutdown was requested
    Cancelled,
    /// Waiting for readiness failed
    WaitFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    /// The session has ended; one more round of USB servicing, then close
    Draining,
    Terminated,
}

/// State of the one live connection
struct Session<S, H> {
    transport: TransportChannel<S>,
    /// Absent only after a reconnection was abandoned
    host: Option<H>,
    reconnect: ReconnectMachine,
    state: LoopState,
}

pub struct Engine<U, F> {
    usb: U,
    factory: F,
    options: SessionOptions,
    shutdown: ShutdownToken,
}

impl<U, F> Engine<U, F>
where
    U: UsbSubsystem,
    F: HostFactory,
    F::Host: RedirHost<Handle = U::Handle>,
{
    pub fn new(usb: U, factory: F, options: SessionOptions, shutdown: ShutdownToken) -> Self {
        Self {
            usb,
            factory,
            options,
            shutdown,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn shutdown_token(&self) -> &ShutdownToken {
        &self.shutdown
    }

    /// Serve one accepted connection until it ends
    ///
    /// `Err` is returned only for conditions the process cannot recover from:
    /// the USB library failing to re-initialise or a host failing to open.
    pub fn serve<S>(&mut self, mut transport: TransportChannel<S>) -> common::Result<SessionEnd>
    where
        S: Read + Write + AsFd,
    {
        let handle = loop {
            if self.shutdown.is_cancelled() {
                transport.close();
                return Ok(SessionEnd::Cancelled);
            }
            if let Some(handle) = locate(&self.usb, &self.options.identity) {
                break handle;
            }
            if !self.options.wait_mode {
                transport.close();
                return Ok(SessionEnd::DeviceNotFound);
            }
            if transport.check_hangup() {
                return Ok(SessionEnd::PeerClosed);
            }
            self.shutdown.sleep(self.options.wait_timeout);
        };

        let host = match self.factory.open(handle, OpenFlags::default()) {
            Ok(host) => host,
            Err(e) => {
                transport.close();
                return Err(e);
            }
        };

        let mut session = Session {
            transport,
            host: Some(host),
            reconnect: ReconnectMachine::new(),
            state: LoopState::Running,
        };
        let result = self.run(&mut session);
        if result.is_err() {
            session.transport.close();
        }
        result
    }

    /// Drive the session through Running, Draining and Terminated
    fn run<S>(&mut self, session: &mut Session<S, F::Host>) -> common::Result<SessionEnd>
    where
        S: Read + Write + AsFd,
    {
        info!("Starting event loop for {}", session.transport.peer());
        let mut end = SessionEnd::PeerClosed;

        loop {
            match session.state {
                LoopState::Running => {
                    if let Some(reason) = self.step(session)? {
                        info!(
                            "Leaving event loop for {} ({:?})",
                            session.transport.peer(),
                            reason
                        );
                        end = reason;
                        session.state = LoopState::Draining;
                    }
                }
                LoopState::Draining => {
                    self.service_usb();
                    session.transport.close();
                    session.state = LoopState::Terminated;
                }
                LoopState::Terminated => {
                    debug!("session terminated");
                    return Ok(end);
                }
            }
        }
    }

    /// One iteration while Running; `Some` ends the session
    fn step<S>(&mut self, session: &mut Session<S, F::Host>) -> common::Result<Option<SessionEnd>>
    where
        S: Read + Write + AsFd,
    {
        if session.transport.is_closed() {
            return Ok(Some(SessionEnd::PeerClosed));
        }
        if self.shutdown.is_cancelled() {
            return Ok(Some(SessionEnd::Cancelled));
        }
        let Some(host) = session.host.as_mut() else {
            return Ok(Some(SessionEnd::Cancelled));
        };

        let wait_timeout = self
            .options
            .wait_mode
            .then_some(self.options.wait_timeout);
        let usb_fds = self.usb.poll_fds();
        let deadline = readiness::deadline(self.usb.next_timeout(), wait_timeout);
        let wake = {
            let mut set = ReadinessSet::build(
                session.transport.as_fd(),
                host.has_data_to_write(),
                &usb_fds,
            );
            match set.wait(deadline) {
                Ok(wake) => wake,
                Err(Errno::EINTR) => return Ok(None),
                Err(e) => {
                    error!("poll: {}", e);
                    return Ok(Some(SessionEnd::WaitFailed));
                }
            }
        };

        if wake.timed_out {
            self.service_usb();
            if !self.options.wait_mode {
                return Ok(None);
            }
        }

        if wake.transport_readable
            && let Err(e) = host.read_guest_data(&mut session.transport)
        {
            debug!("read_guest_data: {}", e);
            return Ok(Some(SessionEnd::HostError));
        }
        // Reading may have observed the peer closing
        if session.transport.is_closed() {
            return Ok(Some(SessionEnd::PeerClosed));
        }

        if wake.transport_writable
            && let Err(e) = host.write_guest_data(&mut session.transport)
        {
            debug!("write_guest_data: {}", e);
            return Ok(Some(SessionEnd::HostError));
        }

        if wake.usb_ready {
            self.service_usb();
        }

        if self.options.wait_mode {
            self.evaluate_reconnect(session, wake.timed_out)?;
        }
        Ok(None)
    }

    fn service_usb(&self) {
        if let Err(e) = self.usb.handle_events() {
            warn!("USB event handling failed: {}", e);
        }
    }

    fn evaluate_reconnect<S>(
        &mut self,
        session: &mut Session<S, F::Host>,
        timed_out: bool,
    ) -> common::Result<()>
    where
        S: Read + Write + AsFd,
    {
        if session.transport.is_closed() {
            return Ok(());
        }
        let Some(host) = session.host.as_mut() else {
            return Ok(());
        };

        let mut disconnected = host.is_disconnected();
        debug!(
            "disconnected = {}, phase = {:?}",
            disconnected,
            session.reconnect.phase()
        );

        let mut action = session.reconnect.observe(disconnected, timed_out);
        if action == ReconnectAction::Probe {
            if let Err(e) = self.usb.active_configuration(host.device()) {
                debug!("Liveness probe failed: {}", e);
                if !disconnected {
                    host.disconnect();
                    disconnected = true;
                }
            }
            action = session.reconnect.probe_finished(disconnected);
        }

        if action == ReconnectAction::Reconnect {
            self.reconnect(session)?;
        }
        Ok(())
    }

    /// Rebind the session to the device once it returns, keeping the
    /// transport and the negotiated capabilities
    fn reconnect<S>(&mut self, session: &mut Session<S, F::Host>) -> common::Result<()>
    where
        S: Read + Write + AsFd,
    {
        let Some(mut lost) = session.host.take() else {
            session.reconnect.abandoned();
            return Ok(());
        };
        info!("Device {} lost, waiting for it to return", self.options.identity);

        if let Err(e) = lost.write_guest_data(&mut session.transport) {
            debug!("write_guest_data: {}", e);
        }
        self.shutdown.sleep(self.options.wait_timeout);
        if let Err(e) = lost.read_guest_data(&mut session.transport) {
            debug!("read_guest_data: {}", e);
        }
        let caps = lost.save_caps();
        drop(lost);

        loop {
            if session.transport.check_hangup() || self.shutdown.is_cancelled() {
                info!("Abandoning reconnection to {}", self.options.identity);
                session.reconnect.abandoned();
                return Ok(());
            }

            self.usb
                .reinit()
                .map_err(|e| Error::Usb(format!("Could not init libusb: {}", e)))?;

            let Some(handle) = locate(&self.usb, &self.options.identity) else {
                match self.options.identity {
                    DeviceIdentity::VendorProduct {
                        vendor_id,
                        product_id,
                    } => info!("Waiting for vid:pid {:04x}:{:04x} ...", vendor_id, product_id),
                    DeviceIdentity::BusAddress { bus, address } => {
                        info!("Waiting for usb-device at bus-addr {}-{} ...", bus, address)
                    }
                }
                self.shutdown.sleep(self.options.wait_timeout);
                continue;
            };

            let mut host = self.factory.open(handle, OpenFlags::NO_HELLO)?;
            host.restore_caps_and_send_device_connect(&caps);
            if let Err(e) = host.write_guest_data(&mut session.transport) {
                debug!("write_guest_data: {}", e);
            }
            session.host = Some(host);
            session.reconnect.reconnected();
            info!("Device {} is back", self.options.identity);
            return Ok(());
        }
    }
}
