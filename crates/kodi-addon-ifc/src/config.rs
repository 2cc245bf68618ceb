//! Controller configuration.

use crate::error::{InterfaceError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the child-side launcher executable.
pub const LAUNCHER_EXE_NAME: &str = "kodi-addon-launcher";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Executable that starts sandboxed add-on binaries.
    pub launcher_exe: PathBuf,
    pub devkit_lib: PathBuf,
    pub devkit_dir: PathBuf,
    /// Where add-ons drop crash reports.
    pub report_path: PathBuf,
    /// Directory holding per-process socket endpoints.
    pub rendezvous_dir: PathBuf,
    /// How long an unused process is kept alive; `None` kills it as soon as
    /// its last instance is gone.
    pub idle_timeout_ms: Option<u64>,
    pub sweep_interval_ms: u64,
    pub call_timeout_ms: u64,
    /// Time the add-on gets to honour a kill request.
    pub kill_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub start_timeout_ms: u64,
    /// Runs every add-on in-process.
    pub no_sandbox: bool,
    /// Passes `--debug` to add-ons.
    pub debug: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        Self {
            launcher_exe: exe_dir.join(LAUNCHER_EXE_NAME),
            devkit_lib: PathBuf::new(),
            devkit_dir: PathBuf::new(),
            report_path: std::env::temp_dir(),
            rendezvous_dir: std::env::temp_dir(),
            idle_timeout_ms: Some(3000),
            sweep_interval_ms: 500,
            call_timeout_ms: 30_000,
            kill_timeout_ms: 1000,
            connect_timeout_ms: 5000,
            start_timeout_ms: 10_000,
            no_sandbox: false,
            debug: true,
        }
    }
}

impl ControllerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    /// Sandboxed launches need the launcher and the devkit library.
    pub fn validate_devkit(&self) -> Result<()> {
        if self.no_sandbox {
            return Ok(());
        }
        for path in [&self.launcher_exe, &self.devkit_lib] {
            if !path.is_file() {
                return Err(InterfaceError::DevkitMissing(path.clone()));
            }
        }
        Ok(())
    }
}
