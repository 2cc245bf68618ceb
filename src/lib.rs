//! # kodi-addons - Binary add-on hosting
//!
//! Runs Kodi binary add-ons either in a sandboxed child process or linked
//! into the host, behind one interface.
//!
//! ## Architecture
//!
//! kodi-addons is an umbrella crate that coordinates:
//! - **kodi-addon-ifc** - Host side (controller, processes, channels, instance handles, settings)
//! - **kodi-addon-runner** - Add-on side (runtime serving an add-on entry, launcher binary)
//!
//! ## Quick Start
//!
//! ```ignore
//! use kodi_addons::prelude::*;
//!
//! let catalog = Arc::new(InMemoryCatalog::new());
//! catalog.insert(
//!     AddonInfo::new("screensaver.test", AddonType::Screensaver, "/addons/screensaver.test/screensaver.test")
//!         .with_profile_path("/userdata/addon_data/screensaver.test"),
//! );
//!
//! let host = AddonHost::builder(catalog).build()?;
//!
//! // Launches the add-on process on first use
//! let screensaver = host.create_instance("screensaver.test", InstanceKind::Screensaver)?;
//! let speed = screensaver.setting_int("speed");
//!
//! // Dropping the last handle releases the process
//! drop(screensaver);
//! ```
//!
//! ## Add-on side
//!
//! ```ignore
//! use kodi_addons::runner;
//!
//! fn main() -> std::process::ExitCode {
//!     let entry = Arc::new(AddonBaseEntry::new(MyScreensaver::default()));
//!     match runner::run(entry) {
//!         Ok(()) => std::process::ExitCode::SUCCESS,
//!         Err(_) => std::process::ExitCode::FAILURE,
//!     }
//! }
//! ```

/// Re-export of kodi-addon-ifc for direct access
pub use kodi_addon_ifc as ifc;

/// Re-export of kodi-addon-runner for add-on binaries
pub use kodi_addon_runner as runner;

mod builder;
mod error;
mod host;

pub use builder::AddonHostBuilder;
pub use error::{Error, Result};
pub use host::AddonHost;

pub use kodi_addon_ifc::{
    AddonBase, AddonBaseEntry, AddonCatalog, AddonEntry, AddonInfo, AddonLanguage, AddonStatus,
    AddonType, ChildStatus, Controller, ControllerConfig, CrashReport, CrashReportChoice,
    CrashReporter, DirectRegistry, DisabledReason, HostApi, InMemoryCatalog, InstanceHandler,
    InstanceInfo, InstanceKind, InstanceToken, InterfaceError, LauncherFactory, ProcessInfo,
    RunningProcess, SettingDefinition, SettingValue, SettingsDialogs, StopObserver,
};
pub use kodi_addon_runner::{AddonServer, RunnerError};

/// Common imports for hosts and add-ons.
pub mod prelude {
    pub use crate::{AddonHost, AddonHostBuilder, Error, Result};

    pub use kodi_addon_ifc::{
        AddonBase, AddonBaseEntry, AddonCatalog, AddonEntry, AddonInfo, AddonStatus, AddonType,
        ChildStatus, ControllerConfig, CrashReport, CrashReportChoice, CrashReporter,
        DirectRegistry, HostApi, InMemoryCatalog, InstanceHandler, InstanceInfo, InstanceKind,
        InstanceToken, SettingDefinition, SettingValue, StopObserver,
    };

    pub use std::sync::Arc;
}
