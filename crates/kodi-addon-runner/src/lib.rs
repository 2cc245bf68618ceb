//! Add-on side runtime for Kodi binary add-ons
//!
//! This crate provides the child-side counterpart of `kodi-addon-ifc`. An
//! add-on binary hands its [`AddonEntry`] to [`run`], which connects to the
//! host, starts the entry and serves host calls until told to stop. The
//! `kodi-addon-launcher` binary is what the host spawns; it executes the
//! add-on binary in its place.
//!
//! ## Usage
//!
//! ```ignore
//! use kodi_addon_runner::run;
//!
//! fn main() -> std::process::ExitCode {
//!     let entry = Arc::new(AddonBaseEntry::new(MyScreensaver::default()));
//!     match run(entry) {
//!         Ok(()) => ExitCode::SUCCESS,
//!         Err(_) => ExitCode::FAILURE,
//!     }
//! }
//! ```

pub mod args;
pub mod error;
pub mod launcher;
mod link;
pub mod server;

pub use args::{LauncherArgs, RunnerArgs};
pub use error::{Result, RunnerError};
pub use link::RunnerLink;
pub use server::AddonServer;

pub use kodi_addon_ifc::{AddonBase, AddonBaseEntry, AddonEntry, HostApi, HostLink};

use std::sync::Arc;

/// Logs to stderr, which the host forwards into its own log.
pub fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Runs the add-on with the process command line.
pub fn run(entry: Arc<dyn AddonEntry>) -> Result<()> {
    let server = AddonServer::from_argv(std::env::args().collect(), entry)?;
    init_tracing(server.args().debug);
    server.run()
}
