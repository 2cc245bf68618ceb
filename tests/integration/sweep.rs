//! Idle sweep integration tests
//!
//! Processes without instances live until their idle deadline; being in use
//! renews the deadline. Helper launches have no deadline and stop by
//! themselves.

use kodi_addons::prelude::*;
use std::time::Duration;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::*;

fn idle_host(idle_timeout_ms: u64) -> TestHost {
    mock_host_with(AddonTally::new(), CrashReportChoice::Ignore, |config| {
        config.idle_timeout_ms = Some(idle_timeout_ms);
    })
}

/// Test that an unused process survives its last instance until the timeout.
#[test]
fn test_idle_process_kept_until_timeout() {
    let t = idle_host(300);

    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    drop(handler);

    let process = t.host.controller().running_process(SCREENSAVER).unwrap();
    assert_eq!(process.instance_count(), 0);
    assert!(process.uses_end_time());
    assert_eq!(t.mock().kills(SCREENSAVER), 0);

    assert!(wait_until(sweep_deadline(), || {
        t.host.controller().running_process(SCREENSAVER).is_none()
    }));
    assert!(wait_until(sweep_deadline(), || t.mock().kills(SCREENSAVER) == 1));
    assert!(t.reporter.reports.lock().is_empty());
}

/// Test that a zero timeout reaps the process on the next sweep.
#[test]
fn test_zero_idle_timeout_reaped_on_next_sweep() {
    let t = idle_host(0);

    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    drop(handler);

    assert!(wait_until(sweep_deadline(), || {
        t.host.controller().running_process(SCREENSAVER).is_none()
    }));
}

/// Test that a process with an attached instance is never reaped.
#[test]
fn test_in_use_process_not_reaped() {
    let t = idle_host(50);

    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    std::thread::sleep(Duration::from_millis(10 * TEST_SWEEP_MS));

    assert!(t.host.controller().running_process(SCREENSAVER).is_some());
    assert_eq!(t.mock().kills(SCREENSAVER), 0);
    assert!(handler.process().unwrap().end_time_left() > Duration::ZERO);
}

/// Test that an instance created before the deadline reuses the process.
#[test]
fn test_reattach_before_timeout_reuses_process() {
    let t = idle_host(5000);

    let first = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    let uuid = first.process().unwrap().uuid().to_string();
    drop(first);

    let second = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    assert_eq!(second.process().unwrap().uuid(), uuid);
    assert_eq!(t.mock().processes(SCREENSAVER), 1);
    assert_eq!(t.mock().launches(SCREENSAVER), 1);
    // The add-on was destroyed with the last instance and created again.
    assert_eq!(AddonTally::count(&t.tally.destroys), 1);
    assert_eq!(AddonTally::count(&t.tally.creates), 2);
}

/// Test that a helper launch has no idle deadline and outlives the sweeps.
#[test]
fn test_helper_launch_survives_sweeps() {
    let t = idle_host(0);

    let process = t.host.launch_addon(EXECUTABLE, &[], false).unwrap();
    assert!(!process.uses_end_time());
    std::thread::sleep(Duration::from_millis(10 * TEST_SWEEP_MS));

    assert!(t.host.controller().running_process(EXECUTABLE).is_some());
    assert_eq!(t.mock().kills(EXECUTABLE), 0);
}

/// Test that a helper which exits by itself is cleared without a crash report.
#[test]
fn test_finished_helper_cleared_quietly() {
    let t = idle_host(0);

    t.host.launch_addon(EXECUTABLE, &[], false).unwrap();
    let control = t.mock().last(EXECUTABLE).unwrap();
    control.crash(ChildStatus::ExitedNormally, "");

    assert!(wait_until(sweep_deadline(), || {
        t.host.controller().running_process(EXECUTABLE).is_none()
    }));
    assert!(wait_until(sweep_deadline(), || t.mock().kills(EXECUTABLE) == 1));
    assert_eq!(control.status(), ChildStatus::ExitedNormally);
    std::thread::sleep(Duration::from_millis(5 * TEST_SWEEP_MS));
    assert!(t.reporter.reports.lock().is_empty());
}
