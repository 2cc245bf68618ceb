//! Launcher binary. Spawned by the host to start one sandboxed add-on.

use clap::Parser;
use kodi_addon_runner::{init_tracing, launcher::exec_addon, LauncherArgs};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = LauncherArgs::parse();
    init_tracing(args.debug());

    let err = exec_addon(&args);
    tracing::error!("{err}");
    ExitCode::FAILURE
}
