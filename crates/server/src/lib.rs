//! usbredir-server library
//!
//! Exports a single USB device to one remote client over TCP/IPv6 using the
//! usbredir protocol. The binary wires these pieces together; tests drive the
//! engine with in-memory USB and host fakes.

pub mod config;
pub mod engine;
pub mod host;
pub mod network;
pub mod shutdown;
pub mod transport;
pub mod usb;

pub use config::{RuntimeOptions, ServerConfig};
pub use engine::{Engine, SessionEnd, SessionOptions};
pub use network::{Server, bind_listener};
pub use shutdown::ShutdownToken;
pub use transport::{ChannelState, GuestIo, TransportChannel};

/// Version string announced in the protocol greeting
pub const SERVER_VERSION: &str = concat!("usbredir-server ", env!("CARGO_PKG_VERSION"));
