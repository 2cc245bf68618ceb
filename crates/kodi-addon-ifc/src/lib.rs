//! Add-on process supervision and IPC for Kodi
//!
//! This crate provides the host-side API for running binary add-ons either
//! sandboxed in their own process or directly inside the host. The add-on
//! side runner lives in `kodi-addon-runner`.
//!
//! ## Benefits
//!
//! - **Crash isolation**: A crashing add-on is reaped and reported, the host keeps running
//! - **Lazy processes**: One process per add-on, started by its first instance
//! - **Idle shutdown**: Processes without instances stop after a configurable timeout
//! - **Typed calls**: Every function on the wire has a declared input and output type
//!
//! ## Usage
//!
//! ```ignore
//! use kodi_addon_ifc::{Controller, ControllerConfig, InMemoryCatalog, InstanceHandler};
//!
//! let catalog = Arc::new(InMemoryCatalog::new());
//! let info = catalog.insert(AddonInfo::new("screensaver.shapes", AddonType::Screensaver, path));
//!
//! let controller = Controller::new(ControllerConfig::default(), catalog)?;
//! controller.start()?;
//!
//! // Launches the add-on process on first use
//! let handler = InstanceHandler::new(&controller, info, InstanceKind::Screensaver);
//! handler.create_instance();
//! ```

pub mod error;
pub use error::{InterfaceError, LaunchStage, Result};

#[doc(hidden)]
pub mod protocol;
pub use protocol::{AddonStatus, FuncGroup, Frame, InstanceInfo, InstanceKind, LogLevel};

pub mod api;
pub use api::ApiFunction;

mod arena;
pub use arena::InstanceToken;

mod dispatch;
pub use dispatch::HandlerTable;

#[doc(hidden)]
pub mod transport;

mod entry;
pub use entry::{AddonBase, AddonBaseEntry, AddonEntry, HostApi, HostLink};

pub mod launcher;
pub use launcher::{ChildStatus, DirectRegistry, LaunchCommand, Launcher, LauncherFactory};

mod channel;

mod settings;
pub use settings::{AddonSettings, SettingDefinition, SettingKind, SettingValue};

mod addon;
pub use addon::{Addon, AddonInfo, AddonLanguage, AddonType, InstanceUse};

mod catalog;
pub use catalog::{AddonCatalog, DisabledReason, InMemoryCatalog};

mod dialog;
pub use dialog::{DialogId, SettingsDialogs};

mod config;
pub use config::{ControllerConfig, LAUNCHER_EXE_NAME};

mod crash;
pub use crash::{CrashReport, CrashReportChoice, CrashReporter, IgnoreCrashes};

mod callbacks;

mod process;
pub use process::{ProcessInfo, RunningProcess};

mod controller;
pub use controller::{Controller, ControllerBuilder};

mod instance;
pub use instance::{InstanceHandler, StopObserver};
