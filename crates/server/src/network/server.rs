//! TCP accept loop

use crate::engine::{Engine, SessionEnd};
use crate::host::{HostFactory, RedirHost};
use crate::transport::TransportChannel;
use crate::usb::UsbSubsystem;
use common::{Error, Result};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::socket::{
    AddressFamily, Backlog, SockFlag, SockType, SockaddrIn6, bind, listen, setsockopt, socket,
    sockopt,
};
use std::io;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6, TcpListener, TcpStream};
use std::os::fd::{AsFd, AsRawFd};
use tracing::{debug, info, warn};

/// Longest the accept loop blocks before rechecking for shutdown
const ACCEPT_POLL_MS: u16 = 500;

/// Bind `[::]:port` with `SO_REUSEADDR` and a backlog of one
pub fn bind_listener(port: u16) -> Result<TcpListener> {
    let fd = socket(
        AddressFamily::Inet6,
        SockType::Stream,
        SockFlag::empty(),
        None,
    )
    .map_err(|e| Error::Network(format!("Error creating ipv6 socket: {}", e)))?;

    setsockopt(&fd, sockopt::ReuseAddr, &true)
        .map_err(|e| Error::Network(format!("Error setsockopt(SO_REUSEADDR) failed: {}", e)))?;

    let addr = SockaddrIn6::from(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0));
    bind(fd.as_raw_fd(), &addr)
        .map_err(|e| Error::Network(format!("Error binding port {}: {}", port, e)))?;

    let backlog = Backlog::new(1).map_err(|e| Error::Network(format!("Invalid backlog: {}", e)))?;
    listen(&fd, backlog).map_err(|e| Error::Network(format!("Error listening: {}", e)))?;

    let listener = TcpListener::from(fd);
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Serves one client connection at a time until shutdown
pub struct Server<U, F> {
    listener: TcpListener,
    engine: Engine<U, F>,
}

impl<U, F> Server<U, F>
where
    U: UsbSubsystem,
    F: HostFactory,
    F::Host: RedirHost<Handle = U::Handle>,
{
    pub fn new(listener: TcpListener, engine: Engine<U, F>) -> Self {
        Self { listener, engine }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve connections until shutdown is requested
    ///
    /// Returns `Err` only on fatal conditions; the listener is closed when the
    /// server is dropped.
    pub fn run(mut self) -> Result<()> {
        info!("Listening on {}", self.local_addr()?);

        while !self.engine.shutdown_token().is_cancelled() {
            let Some((stream, peer)) = self.accept()? else {
                continue;
            };
            info!("Accepted connection from {}", peer);

            if let Err(e) = stream.set_nonblocking(true) {
                warn!("Could not make connection from {} non-blocking: {}", peer, e);
                continue;
            }

            let end = self
                .engine
                .serve(TransportChannel::new(stream, peer.to_string()))?;
            match end {
                SessionEnd::DeviceNotFound => {
                    info!("No device for {}, connection closed", peer)
                }
                other => info!("Session with {} ended: {:?}", peer, other),
            }
        }

        info!("Shutdown requested, closing listener");
        Ok(())
    }

    /// Wait briefly for a pending connection
    fn accept(&self) -> Result<Option<(TcpStream, SocketAddr)>> {
        let mut fds = [PollFd::new(self.listener.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(ACCEPT_POLL_MS)) {
            Ok(0) | Err(Errno::EINTR) => return Ok(None),
            Ok(_) => {}
            Err(e) => return Err(Error::Network(format!("poll on listener: {}", e))),
        }

        match self.listener.accept() {
            Ok(pair) => Ok(Some(pair)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionAborted
                ) =>
            {
                debug!("accept: {}", e);
                Ok(None)
            }
            Err(e) => Err(Error::Network(format!("accept: {}", e))),
        }
    }
}
