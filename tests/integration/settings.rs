//! Settings and callback integration tests
//!
//! The add-on reads its settings through host callbacks while its instance
//! is being created; the host side accessors share the same store.

use kodi_addons::prelude::*;
use std::sync::atomic::Ordering;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::*;

/// Test that instance creation reads settings back through the host.
#[test]
fn test_create_reads_setting_through_host() {
    let t = mock_host(AddonTally::new());

    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    assert_eq!(*t.tally.speeds.lock(), vec![DEFAULT_SPEED]);
    assert_eq!(handler.get_instance_setting_int("speed"), Some(DEFAULT_SPEED));
    assert!(handler.is_instance_setting_using_default("speed"));
}

/// Test that a bool setting reads back what was just set, with and without
/// an open settings dialog.
#[test]
fn test_bool_setting_round_trip() {
    let t = mock_host(AddonTally::new());
    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();

    assert_eq!(handler.get_instance_setting_bool("enabled"), Some(false));
    assert!(handler.set_instance_setting_bool("enabled", true));
    assert_eq!(handler.get_instance_setting_bool("enabled"), Some(true));

    let dialogs = t.host.controller().dialogs();
    let dialog = dialogs.open(handler.addon().unwrap(), 0);
    assert!(handler.set_instance_setting_bool("enabled", false));
    dialogs.close(dialog, true).unwrap();
    assert_eq!(handler.get_instance_setting_bool("enabled"), Some(false));
}

/// Test that a stored setting is what the next instance sees.
#[test]
fn test_saved_setting_used_by_next_instance() {
    let t = mock_host(AddonTally::new());

    let first = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    assert!(first.set_instance_setting_int("speed", 7));
    assert!(!first.is_instance_setting_using_default("speed"));

    let _second = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    assert_eq!(*t.tally.speeds.lock(), vec![DEFAULT_SPEED, 7]);
}

/// Test that settings survive a process restart through the profile.
#[test]
fn test_settings_written_to_profile() {
    let t = mock_host(AddonTally::new());

    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    assert!(handler.set_instance_setting_string("title", "night"));
    assert!(handler.set_instance_setting_int("speed", 5));
    drop(handler);
    assert!(t.host.controller().running_process(SCREENSAVER).is_none());

    let saved = std::fs::read_to_string(t.profile_path(SCREENSAVER).join("settings.xml")).unwrap();
    assert!(saved.contains("night"));

    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    assert_eq!(handler.get_instance_setting_string("title").as_deref(), Some("night"));
    assert_eq!(*t.tally.speeds.lock(), vec![DEFAULT_SPEED, 5]);
    assert_eq!(t.mock().processes(SCREENSAVER), 2);
}

/// Test that typed getters refuse settings of another type.
#[test]
fn test_typed_getters_check_kind() {
    let t = mock_host(AddonTally::new());

    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    assert_eq!(handler.get_instance_setting_bool("speed"), None);
    assert_eq!(handler.get_instance_setting_string("speed"), None);
    assert_eq!(handler.get_instance_setting_int("missing"), None);
    assert!(!handler.set_instance_setting_bool("missing", true));
}

/// Test that an open settings dialog takes the value instead of the store.
#[test]
fn test_open_dialog_takes_setting() {
    let t = mock_host(AddonTally::new());

    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    let dialogs = t.host.controller().dialogs();
    let dialog = dialogs.open(handler.addon().unwrap(), 0);

    assert!(handler.set_instance_setting_int("speed", 9));
    assert_eq!(dialogs.pending_value(dialog, "speed").as_deref(), Some("9"));
    assert_eq!(handler.get_instance_setting_int("speed"), Some(DEFAULT_SPEED));

    dialogs.close(dialog, true).unwrap();
    assert_eq!(handler.get_instance_setting_int("speed"), Some(9));
}

/// Test that an open dialog refuses a value of the wrong type and still saves the rest.
#[test]
fn test_open_dialog_refuses_wrong_type() {
    let t = mock_host(AddonTally::new());

    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    let dialogs = t.host.controller().dialogs();
    let dialog = dialogs.open(handler.addon().unwrap(), 0);

    assert!(handler.set_instance_setting_string("title", "kodi-dialog"));
    assert!(!handler.set_instance_setting_bool("speed", true));
    assert!(handler.set_instance_setting_bool("enabled", true));
    assert_eq!(dialogs.pending_value(dialog, "speed"), None);

    dialogs.close(dialog, true).unwrap();
    assert_eq!(
        handler.get_instance_setting_string("title").as_deref(),
        Some("kodi-dialog")
    );
    assert_eq!(handler.get_instance_setting_bool("enabled"), Some(true));
    assert_eq!(handler.get_instance_setting_int("speed"), Some(DEFAULT_SPEED));
    assert!(t.profile_path(SCREENSAVER).join("settings.xml").exists());
}

/// Test that the instance user path is created on demand.
#[test]
fn test_user_path_created() {
    let t = mock_host(AddonTally::new());

    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    let path = handler.instance_user_path().unwrap();
    assert_eq!(path, t.profile_path(SCREENSAVER));
    assert!(path.is_dir());
}

/// Test that an add-on worker thread gets and releases its own channel.
#[test]
fn test_worker_thread_channel() {
    let tally = std::sync::Arc::new(AddonTally {
        open_worker: true,
        ..AddonTally::default()
    });
    let t = mock_host(tally);

    let handler = t.host.create_instance(SCREENSAVER, InstanceKind::Screensaver).unwrap();
    assert_eq!(t.tally.workers.load(Ordering::SeqCst), 1);
    assert_eq!(handler.process().unwrap().thread_count(), 0);
}
