//! Child side of the host's launcher executable.

use crate::args::LauncherArgs;
use crate::error::RunnerError;
use std::os::unix::process::CommandExt;
use std::process::Command;

/// Replaces the current process with the add-on binary. Only returns on
/// failure.
pub fn exec_addon(args: &LauncherArgs) -> RunnerError {
    tracing::debug!(addon = %args.addon.display(), "executing add-on");
    let source = Command::new(&args.addon).args(&args.rest).exec();
    RunnerError::Exec {
        path: args.addon.clone(),
        source,
    }
}
