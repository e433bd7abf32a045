//! Transport channel to the remote guest
//!
//! Wraps the single accepted connection. Reads and writes never block: a
//! would-block is reported as zero bytes, and a peer that went away moves the
//! channel to `Closed` instead of surfacing an error. The redirection host
//! pumps protocol bytes through the [`GuestIo`] implementation.

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsFd, BorrowedFd};
use tracing::{debug, info, warn};

/// Events requested when checking for a departed peer
#[cfg(any(target_os = "linux", target_os = "android"))]
fn hangup_interest() -> PollFlags {
    PollFlags::POLLRDHUP
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn hangup_interest() -> PollFlags {
    PollFlags::empty()
}

/// Events that mean the peer is gone, whatever is still buffered
fn hangup_events() -> PollFlags {
    hangup_interest() | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL
}

/// Non-blocking byte pipe used by the redirection host
///
/// Both calls return `Ok(0)` when nothing can be transferred right now; the
/// caller retries on a later loop iteration. `Err` means the channel is gone.
pub trait GuestIo {
    fn read_guest(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_guest(&mut self, buf: &[u8]) -> io::Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closed,
}

/// The accepted client connection
pub struct TransportChannel<S = TcpStream> {
    stream: Option<S>,
    peer: String,
}

impl<S> TransportChannel<S>
where
    S: Read + Write + AsFd,
{
    /// Wrap an already non-blocking stream
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            peer: peer.into(),
        }
    }

    pub fn state(&self) -> ChannelState {
        if self.stream.is_some() {
            ChannelState::Open
        } else {
            ChannelState::Closed
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Descriptor to wait on, absent once closed
    pub fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        self.stream.as_ref().map(|s| s.as_fd())
    }

    /// Close the channel if the peer has gone away, leaving pending bytes
    /// unread. Returns whether the channel is closed.
    ///
    /// A peer that wrote and then hung up still has bytes queued here, so the
    /// check looks at the socket's hangup state rather than at a read result.
    pub fn check_hangup(&mut self) -> bool {
        let Some(stream) = self.stream.as_ref() else {
            return true;
        };

        let mut fds = [PollFd::new(stream.as_fd(), hangup_interest())];
        let gone = match poll(&mut fds, PollTimeout::ZERO) {
            Ok(0) | Err(Errno::EINTR) => false,
            Ok(_) => fds[0]
                .revents()
                .is_some_and(|revents| revents.intersects(hangup_events())),
            Err(e) => {
                debug!("Peer check on {} failed: {}", self.peer, e);
                true
            }
        };

        if gone {
            info!("Client {} disconnected", self.peer);
            self.close();
        }
        self.is_closed()
    }

    /// Close the connection; later calls are no-ops
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Closed connection to {}", self.peer);
        }
    }
}

impl<S> GuestIo for TransportChannel<S>
where
    S: Read + Write + AsFd,
{
    fn read_guest(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(0);
        };

        match stream.read(buf) {
            Ok(0) => {
                info!("Client {} disconnected", self.peer);
                self.close();
                Ok(0)
            }
            Ok(n) => {
                debug!("read {}/{} bytes from {}", n, buf.len(), self.peer);
                Ok(n)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => {
                warn!("Read from {} failed: {}", self.peer, e);
                self.close();
                Err(e)
            }
        }
    }

    fn write_guest(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(0);
        };

        match stream.write(buf) {
            Ok(n) => {
                debug!("wrote {}/{} bytes to {}", n, buf.len(), self.peer);
                Ok(n)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
                ) =>
            {
                info!("Client {} disconnected during write", self.peer);
                self.close();
                Ok(0)
            }
            Err(e) => {
                warn!("Write to {} failed: {}", self.peer, e);
                self.close();
                Err(e)
            }
        }
    }
}
