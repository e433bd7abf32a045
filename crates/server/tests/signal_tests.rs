//! Termination signals stop an idle server
//!
//! Signal handlers and the flag they set are process-wide, so this binary
//! holds a single test.

mod support;

use nix::sys::pthread::{pthread_kill, pthread_self};
use nix::sys::signal::Signal;
use server::{Engine, Server, ShutdownToken, bind_listener};
use std::thread;
use std::time::{Duration, Instant};
use support::{FakeFactory, FakeUsb, options};

#[test]
fn test_sigterm_stops_accept_loop() {
    let token = ShutdownToken::from_signals().unwrap();
    let engine = Engine::new(
        FakeUsb::with_device(),
        FakeFactory::new(),
        options("1-4", false),
        token,
    );
    let server = Server::new(bind_listener(0).unwrap(), engine);

    let main = pthread_self();
    let signaller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        pthread_kill(main, Signal::SIGTERM).unwrap();
    });

    let start = Instant::now();
    server.run().unwrap();
    signaller.join().unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
}
