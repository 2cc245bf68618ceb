//! Process lifecycle integration tests
//!
//! One process per add-on, instance refcounting and helper launches.

use kodi_addons::prelude::*;
use kodi_addons::{DisabledReason, InterfaceError};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::*;

/// Test that instances of one add-on share a single process.
#[test]
fn test_instances_share_one_process() {
    let t = mock_host(AddonTally::new());

    let first = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    let second = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();

    assert_eq!(t.mock().processes(SCREENSAVER), 1);
    assert_eq!(t.mock().launches(SCREENSAVER), 1);
    assert_eq!(AddonTally::count(&t.tally.creates), 1);
    assert_eq!(AddonTally::count(&t.tally.instances_created), 2);

    let process = first.process().unwrap();
    assert!(Arc::ptr_eq(&process, &second.process().unwrap()));
    assert_eq!(process.instance_count(), 2);
    assert_ne!(first.addon_instance(), second.addon_instance());
}

/// Test that dropping the last instance stops the process when no idle
/// timeout is configured.
#[test]
fn test_last_instance_stops_process() {
    let t = mock_host(AddonTally::new());

    let first = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    let second = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();

    drop(first);
    assert!(t.host.controller().running_process(SCREENSAVER).is_some());
    assert_eq!(t.mock().kills(SCREENSAVER), 0);

    drop(second);
    assert!(t.host.controller().running_process(SCREENSAVER).is_none());
    assert_eq!(t.mock().kills(SCREENSAVER), 1);
    assert_eq!(AddonTally::count(&t.tally.instances_destroyed), 2);
    assert_eq!(AddonTally::count(&t.tally.destroys), 1);
    assert_eq!(t.host.controller().live_instances(), 0);
}

/// Test that concurrent first instances still launch the add-on only once.
#[test]
fn test_concurrent_creates_launch_once() {
    let t = mock_host(AddonTally::new());

    let handlers: Vec<InstanceHandler> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    t.host
                        .create_instance(SCREENSAVER, InstanceKind::Screensaver)
                        .unwrap()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert_eq!(t.mock().processes(SCREENSAVER), 1);
    assert_eq!(t.mock().launches(SCREENSAVER), 1);
    assert_eq!(AddonTally::count(&t.tally.creates), 1);
    assert_eq!(
        t.host.controller().running_process(SCREENSAVER).unwrap().instance_count(),
        8
    );

    drop(handlers);
    assert!(t.host.controller().running_process(SCREENSAVER).is_none());
}

/// Test that different add-ons run in separate processes.
#[test]
fn test_different_addons_get_own_processes() {
    let t = mock_host(AddonTally::new());

    let _screensaver = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    let _visualization = t
        .host
        .create_instance(VISUALIZATION, InstanceKind::Visualization)
        .unwrap();

    let processes = t.host.processes();
    assert_eq!(processes.len(), 2);
    assert_eq!(processes[0].addon_id, SCREENSAVER);
    assert_eq!(processes[1].addon_id, VISUALIZATION);
    assert_ne!(processes[0].uuid, processes[1].uuid);
    assert!(processes.iter().all(|p| p.status == ChildStatus::Running));
    assert!(processes.iter().all(|p| p.instances == 1 && !p.sandboxed));
}

/// Test that an add-on missing from the catalog is refused.
#[test]
fn test_unknown_addon_is_refused() {
    let t = mock_host(AddonTally::new());

    let result = t.host.create_instance("screensaver.missing", InstanceKind::Screensaver);
    assert!(matches!(
        result,
        Err(Error::Interface(InterfaceError::UnknownAddon(_)))
    ));
    assert_eq!(t.mock().processes("screensaver.missing"), 0);
}

/// Test that a disabled add-on is never launched.
#[test]
fn test_disabled_addon_not_launched() {
    let t = mock_host(AddonTally::new());
    t.catalog.disable(SCREENSAVER, DisabledReason::User);

    let result = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver);
    assert!(matches!(
        result,
        Err(Error::InstanceRefused {
            status: AddonStatus::Unknown,
            ..
        })
    ));
    assert_eq!(t.mock().processes(SCREENSAVER), 0);
}

/// Test that a refused instance leaves no process behind.
#[test]
fn test_refused_instance_releases_process() {
    let t = mock_host(AddonTally::new());
    let profile = t.profile_path(SCREENSAVER);
    std::fs::create_dir_all(&profile).unwrap();
    std::fs::write(
        profile.join("settings.xml"),
        r#"<settings version="2"><setting id="speed">0</setting></settings>"#,
    )
    .unwrap();

    let result = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver);
    assert!(matches!(
        result,
        Err(Error::InstanceRefused {
            status: AddonStatus::NeedSettings,
            ..
        })
    ));
    assert!(t.host.controller().running_process(SCREENSAVER).is_none());
    assert_eq!(t.mock().kills(SCREENSAVER), 1);
}

/// Test that a handle created but never started holds no process.
#[test]
fn test_uncreated_handle_holds_nothing() {
    let t = mock_host(AddonTally::new());

    let handler = t.host.instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    assert!(!handler.is_created());
    assert_eq!(t.host.controller().live_instances(), 1);
    assert_eq!(t.mock().processes(SCREENSAVER), 0);

    drop(handler);
    assert_eq!(t.host.controller().live_instances(), 0);
}

/// Test that launch_addon with wait_for_exit cleans up after itself.
#[test]
fn test_launch_addon_wait_for_exit() {
    let t = mock_host(AddonTally::new());

    let process = t
        .host
        .launch_addon(EXECUTABLE, &["--mode".to_string(), "scan".to_string()], true)
        .unwrap();

    assert!(process.is_killed());
    assert!(t.host.controller().running_process(EXECUTABLE).is_none());
    assert_eq!(t.mock().launches(EXECUTABLE), 1);
    assert_eq!(t.mock().kills(EXECUTABLE), 1);
}

fn helper_tally(runtime: Duration) -> Arc<AddonTally> {
    Arc::new(AddonTally {
        helper_runtime: Some(runtime),
        ..Default::default()
    })
}

/// Test that process listings answer while a waited-for helper still runs.
#[test]
fn test_process_info_answers_during_helper_wait() {
    let t = mock_host(helper_tally(Duration::from_millis(1500)));

    std::thread::scope(|s| {
        let helper = s.spawn(|| t.host.launch_addon(EXECUTABLE, &[], true));
        assert!(wait_until(sweep_deadline(), || t.mock().launches(EXECUTABLE) == 1));

        let started = Instant::now();
        let processes = t.host.processes();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].addon_id, EXECUTABLE);
        assert_eq!(processes[0].status, ChildStatus::Running);

        let process = helper.join().unwrap().unwrap();
        assert!(process.is_killed());
    });
    assert!(t.host.controller().running_process(EXECUTABLE).is_none());
    assert!(t.reporter.reports.lock().is_empty());
}

/// Test that killing a waited-for helper ends the wait early.
#[test]
fn test_kill_ends_helper_wait() {
    let t = mock_host(helper_tally(Duration::from_secs(60)));

    std::thread::scope(|s| {
        let started = Instant::now();
        let helper = s.spawn(|| t.host.launch_addon(EXECUTABLE, &[], true));
        assert!(wait_until(sweep_deadline(), || t.mock().launches(EXECUTABLE) == 1));

        let process = t.host.controller().running_process(EXECUTABLE).unwrap();
        assert!(process.kill());
        assert!(helper.join().unwrap().is_ok());
        assert!(started.elapsed() < Duration::from_secs(10));
    });
    assert_eq!(t.mock().kills(EXECUTABLE), 1);
}

/// Test that launching a running add-on returns the existing process.
#[test]
fn test_launch_addon_returns_running_process() {
    let t = mock_host(AddonTally::new());

    let first = t.host.launch_addon(EXECUTABLE, &[], false).unwrap();
    let second = t.host.launch_addon(EXECUTABLE, &[], false).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(t.mock().processes(EXECUTABLE), 1);
    assert_eq!(first.instance_count(), 0);
}

/// Test that shutdown stops every process and later drops stay quiet.
#[test]
fn test_shutdown_kills_everything() {
    let t = mock_host(AddonTally::new());

    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    t.host.launch_addon(EXECUTABLE, &[], false).unwrap();

    t.host.shutdown();
    assert!(t.host.processes().is_empty());
    assert_eq!(t.mock().kills(SCREENSAVER), 1);
    assert_eq!(t.mock().kills(EXECUTABLE), 1);
    assert!(t.host.controller().is_system_stopping());

    drop(handler);
    assert_eq!(t.tally.instances_destroyed.load(Ordering::SeqCst), 0);
    assert!(t.reporter.reports.lock().is_empty());
}
