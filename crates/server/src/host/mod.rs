//! Redirection host
//!
//! A host instance binds one opened device to the protocol stream. The engine
//! drives it through [`RedirHost`]: it asks whether bytes are waiting to go
//! out, pumps inbound and outbound data through the transport, watches for
//! device loss, and carries the negotiated capabilities across a reconnect.
//! Closing a host is dropping it.

pub mod redir;

use crate::transport::GuestIo;
use protocol::Caps;

pub use redir::{UsbRedirHost, UsbRedirHostFactory};

/// Options for [`HostFactory::open`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Skip sending Hello; the peer already completed the greeting with an
    /// earlier instance on this connection
    pub no_hello: bool,
}

impl OpenFlags {
    pub const NO_HELLO: OpenFlags = OpenFlags { no_hello: true };
}

/// One live redirection host
pub trait RedirHost {
    /// Opened device the host is bound to
    type Handle;

    fn device(&self) -> &Self::Handle;

    fn has_data_to_write(&self) -> bool;

    /// Consume whatever the transport has, handling every complete message
    fn read_guest_data(&mut self, io: &mut dyn GuestIo) -> common::Result<()>;

    /// Flush queued protocol bytes until the transport would block
    fn write_guest_data(&mut self, io: &mut dyn GuestIo) -> common::Result<()>;

    /// True once the host has seen the device go away
    fn is_disconnected(&self) -> bool;

    /// Announce device loss to the peer
    fn disconnect(&mut self);

    /// Capabilities negotiated with the peer
    fn save_caps(&self) -> Caps;

    /// Adopt capabilities negotiated by a previous instance and announce the
    /// device, without a new Hello exchange
    fn restore_caps_and_send_device_connect(&mut self, caps: &Caps);
}

/// Creates hosts bound to freshly opened devices
pub trait HostFactory {
    type Host: RedirHost;

    fn open(
        &mut self,
        handle: <Self::Host as RedirHost>::Handle,
        flags: OpenFlags,
    ) -> common::Result<Self::Host>;
}
