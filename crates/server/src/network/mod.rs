//! Network subsystem
//!
//! A single IPv6 TCP listener accepting one client at a time. Each accepted
//! connection is made non-blocking and handed to the engine; the next accept
//! happens only after that session has fully ended.
//!
//! ```text
//! Server
//!   ├─> bind [::]:port (SO_REUSEADDR, backlog 1)
//!   ├─> poll listener with a bounded interval, checking for shutdown
//!   └─> Engine::serve(connection)
//!         ├─> locate device, open host
//!         └─> event loop until the client leaves
//! ```

pub mod server;

pub use server::{Server, bind_listener};
