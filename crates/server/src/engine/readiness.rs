//! Per-iteration readiness set
//!
//! Built fresh on every loop iteration from the transport's interest and the
//! descriptors the USB library currently wants watched, then handed to
//! `poll(2)`. Nothing is carried over between iterations.

use crate::usb::UsbPollFd;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::os::fd::BorrowedFd;
use std::time::Duration;
use tracing::trace;

/// What a single wait reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Wake {
    /// No descriptor became ready before the deadline
    pub timed_out: bool,
    pub transport_readable: bool,
    pub transport_writable: bool,
    /// At least one USB descriptor fired, for either direction
    pub usb_ready: bool,
}

/// How long to block: the USB library's own timeout wins, then the wait-mode
/// fallback, else forever (`None`)
pub fn deadline(usb_timeout: Option<Duration>, wait_timeout: Option<Duration>) -> Option<Duration> {
    usb_timeout.or(wait_timeout)
}

/// Convert a deadline into a poll timeout, rounding sub-millisecond remainders
/// up so a pending library timeout is never polled as zero early and missed
fn poll_timeout(deadline: Option<Duration>) -> PollTimeout {
    let Some(deadline) = deadline else {
        return PollTimeout::NONE;
    };
    let millis = deadline.as_nanos().div_ceil(1_000_000);
    i32::try_from(millis)
        .ok()
        .and_then(|ms| PollTimeout::try_from(ms).ok())
        .unwrap_or(PollTimeout::MAX)
}

/// Ordered `(descriptor, interest)` pairs for one wait
pub struct ReadinessSet<'fd> {
    fds: Vec<PollFd<'fd>>,
    /// Index of the transport entry, if the transport is open
    transport: Option<usize>,
}

impl<'fd> ReadinessSet<'fd> {
    /// The transport is always watched for input and, when `want_write` is
    /// set, for output; USB descriptors follow with the interest they asked for
    pub fn build(transport: Option<BorrowedFd<'fd>>, want_write: bool, usb: &[UsbPollFd]) -> Self {
        let mut fds = Vec::with_capacity(usb.len() + 1);

        let transport = transport.map(|fd| {
            let mut events = PollFlags::POLLIN;
            if want_write {
                events |= PollFlags::POLLOUT;
            }
            fds.push(PollFd::new(fd, events));
            0
        });

        for entry in usb {
            let mut events = PollFlags::empty();
            if entry.readable {
                events |= PollFlags::POLLIN;
            }
            if entry.writable {
                events |= PollFlags::POLLOUT;
            }
            // SAFETY: the USB library keeps its descriptors open while they are
            // listed in its poll set; this set is dropped before the next call
            // into the library.
            let fd = unsafe { BorrowedFd::borrow_raw(entry.fd) };
            fds.push(PollFd::new(fd, events));
        }

        Self { fds, transport }
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Block until something is ready or `deadline` passes
    ///
    /// `EINTR` is returned to the caller so it can check for cancellation.
    pub fn wait(&mut self, deadline: Option<Duration>) -> nix::Result<Wake> {
        let ready = poll(&mut self.fds, poll_timeout(deadline))?;
        trace!("poll: {} of {} descriptors ready", ready, self.fds.len());

        let mut wake = Wake {
            timed_out: ready == 0,
            ..Wake::default()
        };
        if ready == 0 {
            return Ok(wake);
        }

        for (index, fd) in self.fds.iter().enumerate() {
            let revents = fd.revents().unwrap_or(PollFlags::empty());
            if Some(index) == self.transport {
                wake.transport_readable = revents
                    .intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR);
                wake.transport_writable = revents.contains(PollFlags::POLLOUT);
            } else if !revents.is_empty() {
                wake.usb_ready = true;
            }
        }
        Ok(wake)
    }
}
