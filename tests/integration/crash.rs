//! Crash handling integration tests
//!
//! The sweep notices a dead process, tells every instance handle, removes
//! the process and queues a crash report.

use kodi_addons::prelude::*;
use kodi_addons::DisabledReason;
use std::time::Duration;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::*;

fn observed_instance(t: &TestHost, observer: &Arc<RecordingObserver>) -> InstanceHandler {
    let handler = t
        .host
        .instance(SCREENSAVER, InstanceKind::Screensaver)
        .unwrap()
        .with_observer(observer.clone());
    assert_eq!(handler.create_instance(), AddonStatus::Ok);
    handler
}

/// Test that a crash is reported once to every attached instance.
#[test]
fn test_crash_informs_every_instance() {
    let t = mock_host(AddonTally::new());
    let observer = Arc::new(RecordingObserver::default());
    let first = observed_instance(&t, &observer);
    let second = observed_instance(&t, &observer);

    t.mock()
        .last(SCREENSAVER)
        .unwrap()
        .crash(ChildStatus::SegmentationFault, "frame #0 render()");

    assert!(wait_until(sweep_deadline(), || observer.reports.lock().len() == 2));
    assert!(observer
        .reports
        .lock()
        .iter()
        .all(|(id, status)| id == SCREENSAVER && *status == ChildStatus::SegmentationFault));
    assert!(first.is_process_lost());
    assert!(second.is_process_lost());
    assert!(t.host.controller().running_process(SCREENSAVER).is_none());

    std::thread::sleep(Duration::from_millis(5 * TEST_SWEEP_MS));
    assert_eq!(observer.reports.lock().len(), 2);
}

/// Test that the crash report carries what the launcher collected.
#[test]
fn test_crash_report_posted() {
    let t = mock_host(AddonTally::new());
    let _handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    let uuid = t.host.controller().running_process(SCREENSAVER).unwrap().uuid().to_string();

    t.mock()
        .last(SCREENSAVER)
        .unwrap()
        .crash(ChildStatus::StoppedBySignal, "killed by SIGABRT");

    assert!(wait_until(sweep_deadline(), || t.reporter.len() == 1));
    let report = t.reporter.reports.lock()[0].clone();
    assert_eq!(report.addon_id, SCREENSAVER);
    assert_eq!(report.uuid, uuid);
    assert_eq!(report.status, ChildStatus::StoppedBySignal);
    assert_eq!(report.details(), "killed by SIGABRT");
    assert_eq!(report.report_path, t.dir.path());
}

/// Test that the user's answer can disable the add-on.
#[test]
fn test_crash_disables_addon() {
    let t = mock_host_with(AddonTally::new(), CrashReportChoice::DisableAddon, |_| {});
    let _handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();

    t.mock()
        .last(SCREENSAVER)
        .unwrap()
        .crash(ChildStatus::SegmentationFault, "");

    assert!(wait_until(sweep_deadline(), || {
        t.catalog.disabled_reason(SCREENSAVER) == Some(DisabledReason::PermanentFailure)
    }));
    assert!(matches!(
        t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver),
        Err(Error::InstanceRefused { .. })
    ));
}

/// Test that crashes during host shutdown are not reported.
#[test]
fn test_crash_during_system_stop_not_reported() {
    let t = mock_host(AddonTally::new());
    let observer = Arc::new(RecordingObserver::default());
    let _handler = observed_instance(&t, &observer);

    t.host.controller().begin_system_stop();
    t.mock()
        .last(SCREENSAVER)
        .unwrap()
        .crash(ChildStatus::SegmentationFault, "");

    assert!(wait_until(sweep_deadline(), || {
        t.host.controller().running_process(SCREENSAVER).is_none()
    }));
    // Instances still learn about it.
    assert_eq!(observer.reports.lock().len(), 1);
    std::thread::sleep(Duration::from_millis(5 * TEST_SWEEP_MS));
    assert_eq!(t.reporter.len(), 0);
}

/// Test that handles of a crashed process skip the add-on on destroy and
/// that the next instance starts a fresh process.
#[test]
fn test_new_instance_after_crash_relaunches() {
    let t = mock_host(AddonTally::new());
    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();

    t.mock()
        .last(SCREENSAVER)
        .unwrap()
        .crash(ChildStatus::StoppedByUnknown, "");
    assert!(wait_until(sweep_deadline(), || handler.is_process_lost()));

    drop(handler);
    assert_eq!(AddonTally::count(&t.tally.instances_destroyed), 0);

    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    assert!(!handler.is_process_lost());
    assert_eq!(t.mock().processes(SCREENSAVER), 2);
    assert_eq!(t.mock().last(SCREENSAVER).unwrap().status(), ChildStatus::Running);
}

/// Test that a process exiting on its own with no instances is not a crash.
#[test]
fn test_clean_exit_without_instances_not_reported() {
    let t = mock_host(AddonTally::new());
    t.host.launch_addon(EXECUTABLE, &[], false).unwrap();

    t.mock()
        .last(EXECUTABLE)
        .unwrap()
        .crash(ChildStatus::ExitedNormally, "");

    assert!(wait_until(sweep_deadline(), || {
        t.host.controller().running_process(EXECUTABLE).is_none()
    }));
    std::thread::sleep(Duration::from_millis(5 * TEST_SWEEP_MS));
    assert_eq!(t.reporter.len(), 0);
}
