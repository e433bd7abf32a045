//! A termination signal ends a session blocked without a timeout
//!
//! Outside wait mode with no USB work pending the loop waits with no
//! deadline, so only the interrupted `poll` lets it see the request.

mod support;

use nix::sys::pthread::{pthread_kill, pthread_self};
use nix::sys::signal::Signal;
use server::{Engine, SessionEnd, ShutdownToken};
use std::rc::Rc;
use std::thread;
use std::time::Duration;
use support::{FakeFactory, FakeUsb, connection, options};

#[test]
fn test_sigterm_interrupts_blocked_session() {
    let token = ShutdownToken::from_signals().unwrap();
    let factory = FakeFactory::new();
    let log = Rc::clone(&factory.log);
    let mut engine = Engine::new(FakeUsb::with_device(), factory, options("1-4", false), token);
    let (transport, _guest) = connection();

    let main = pthread_self();
    let signaller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        pthread_kill(main, Signal::SIGTERM).unwrap();
    });

    let end = engine.serve(transport).unwrap();
    signaller.join().unwrap();

    assert_eq!(end, SessionEnd::Cancelled);
    assert_eq!(log.opens().len(), 1);
}
