//! Cooperative shutdown
//!
//! A termination signal only flips a flag. The accept loop, every engine
//! iteration and every reconnection retry check it at their boundaries. The
//! handlers are installed without `SA_RESTART`, so a blocked `poll` returns
//! `EINTR` and the loop gets a chance to look at the flag.

use nix::libc::c_int;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Set from the signal handler
static SIGNALLED: AtomicBool = AtomicBool::new(false);

/// Granularity of interruptible sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(100);

extern "C" fn request_shutdown(_signal: c_int) {
    SIGNALLED.store(true, Ordering::SeqCst);
}

/// Shared "stop requested" flag
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    requested: Arc<AtomicBool>,
    follows_signals: bool,
}

impl ShutdownToken {
    /// Token that only trips when [`ShutdownToken::cancel`] is called
    pub fn new() -> Self {
        Self::default()
    }

    /// Install SIGINT/SIGHUP/SIGTERM/SIGQUIT handlers and return a token that
    /// observes them
    pub fn from_signals() -> nix::Result<Self> {
        let action = SigAction::new(
            SigHandler::Handler(request_shutdown),
            SaFlags::empty(),
            SigSet::empty(),
        );
        for signal in [
            Signal::SIGINT,
            Signal::SIGHUP,
            Signal::SIGTERM,
            Signal::SIGQUIT,
        ] {
            // SAFETY: the handler only stores to an atomic.
            unsafe { sigaction(signal, &action) }?;
        }

        Ok(Self {
            requested: Arc::new(AtomicBool::new(false)),
            follows_signals: true,
        })
    }

    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
            || (self.follows_signals && SIGNALLED.load(Ordering::SeqCst))
    }

    /// Sleep for `duration` unless shutdown is requested first
    ///
    /// Returns `false` if the sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}
