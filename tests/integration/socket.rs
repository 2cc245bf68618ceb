//! Sandboxed launch integration tests
//!
//! The add-on is served by the runner over unix sockets, so every host call
//! and every callback crosses the channel protocol.

use kodi_addons::prelude::*;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::*;

/// Test a full instance lifecycle over the socket, including the settings
/// callback the add-on makes while its instance is created.
#[test]
fn test_socket_instance_lifecycle() {
    let t = socket_host(AddonTally::new(), |_| {});

    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    let process = handler.process().unwrap();
    assert!(process.is_sandboxed());
    assert_eq!(process.process_active(), ChildStatus::Running);
    assert_eq!(*t.tally.speeds.lock(), vec![DEFAULT_SPEED]);
    assert_eq!(handler.addon_instance(), 1);

    drop(handler);
    assert!(t.host.controller().running_process(SCREENSAVER).is_none());
    assert_eq!(AddonTally::count(&t.tally.instances_destroyed), 1);
    assert_eq!(AddonTally::count(&t.tally.destroys), 1);
    assert_eq!(t.socket_kills.load(Ordering::SeqCst), 1);
    // The kill request reached the add-on before the process was stopped.
    assert!(wait_until(sweep_deadline(), || AddonTally::count(&t.tally.stops) == 1));
}

/// Test that process listings answer while the add-on handles its stop request.
#[test]
fn test_listing_answers_during_stop_request() {
    let tally = Arc::new(AddonTally {
        stop_delay: Some(Duration::from_millis(300)),
        ..Default::default()
    });
    let t = socket_host(tally, |config| config.kill_timeout_ms = 2000);

    t.host.launch_addon(EXECUTABLE, &[], false).unwrap();
    let process = t.host.controller().running_process(EXECUTABLE).unwrap();

    std::thread::scope(|s| {
        let killer = s.spawn(|| process.kill());
        std::thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        let processes = t.host.processes();
        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(processes.len(), 1);
        assert_eq!(process.process_active(), ChildStatus::Running);

        assert!(killer.join().unwrap());
    });
    assert_eq!(AddonTally::count(&t.tally.stops), 1);
}

/// Test that a second instance reuses the connected process.
#[test]
fn test_socket_instances_share_process() {
    let t = socket_host(AddonTally::new(), |_| {});

    let first = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    let second = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();

    assert_eq!(first.process().unwrap().uuid(), second.process().unwrap().uuid());
    assert_eq!(AddonTally::count(&t.tally.creates), 1);
    assert_eq!(t.tally.speeds.lock().len(), 2);
}

/// Test that an add-on worker thread connects its own socket channel.
#[test]
fn test_socket_worker_thread_channel() {
    let tally = Arc::new(AddonTally {
        open_worker: true,
        ..AddonTally::default()
    });
    let t = socket_host(tally, |_| {});

    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    assert_eq!(AddonTally::count(&t.tally.workers), 1);
    assert_eq!(handler.process().unwrap().thread_count(), 0);
}

/// Test that a call running past its timeout makes the process count as
/// unresponsive and takes the crash path.
#[test]
fn test_slow_call_marks_process_unresponsive() {
    let tally = Arc::new(AddonTally {
        create_delay: Some(Duration::from_millis(800)),
        ..AddonTally::default()
    });
    let t = socket_host(tally, |config| {
        config.call_timeout_ms = 200;
        config.idle_timeout_ms = Some(60_000);
    });

    let result = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver);
    assert!(matches!(
        result,
        Err(Error::InstanceRefused {
            status: AddonStatus::Unknown,
            ..
        })
    ));

    assert!(wait_until(sweep_deadline(), || t.reporter.len() == 1));
    assert_eq!(t.reporter.reports.lock()[0].status, ChildStatus::Unresponsive);
    assert!(t.host.controller().running_process(SCREENSAVER).is_none());
}
