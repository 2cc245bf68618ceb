//! Process launchers.
//!
//! A [`Launcher`] starts one add-on, reports its liveness and terminates it.
//! [`PosixLauncher`] spawns a child process; [`DirectLauncher`] links the
//! add-on into the host and never spawns anything.

mod direct;
mod posix;

pub use direct::{DirectFactory, DirectLauncher, DirectRegistry, DIRECT_ENTRY_SYMBOL};
pub use posix::PosixLauncher;

use crate::addon::AddonInfo;
use crate::entry::AddonEntry;
use crate::error::Result;
use crate::protocol::API_VERSION_MAJOR;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Liveness of a launched add-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildStatus {
    NotStarted,
    Running,
    ExitedNormally,
    SegmentationFault,
    StoppedBySignal,
    StoppedByUnknown,
    /// A call timed out; the process is alive but no longer trusted.
    Unresponsive,
}

impl ChildStatus {
    pub fn is_crash(self) -> bool {
        matches!(
            self,
            ChildStatus::SegmentationFault
                | ChildStatus::StoppedBySignal
                | ChildStatus::StoppedByUnknown
                | ChildStatus::Unresponsive
        )
    }
}

impl std::fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildStatus::NotStarted => write!(f, "not started"),
            ChildStatus::Running => write!(f, "running"),
            ChildStatus::ExitedNormally => write!(f, "exited normally"),
            ChildStatus::SegmentationFault => write!(f, "segmentation fault"),
            ChildStatus::StoppedBySignal => write!(f, "stopped by signal"),
            ChildStatus::StoppedByUnknown => write!(f, "stopped by unknown cause"),
            ChildStatus::Unresponsive => write!(f, "unresponsive"),
        }
    }
}

pub enum LaunchOutcome {
    Spawned { pid: u32 },
    Direct(Arc<dyn AddonEntry>),
}

impl std::fmt::Debug for LaunchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchOutcome::Spawned { pid } => f.debug_struct("Spawned").field("pid", pid).finish(),
            LaunchOutcome::Direct(_) => f.write_str("Direct"),
        }
    }
}

pub trait Launcher: Send {
    /// Starts the add-on and returns without waiting for it to exit.
    fn launch(&mut self, command: &LaunchCommand) -> Result<LaunchOutcome>;

    /// Whether `binary` can be started without waiting for a handshake.
    fn supports_non_blocking(&self, binary: &Path) -> bool;

    /// Returns false if the add-on was not running.
    fn kill(&mut self, wait: bool) -> bool;

    fn process_active(&mut self) -> ChildStatus;

    /// Whatever the add-on printed before dying.
    fn stack_trace(&self) -> String;

    fn main_pid(&self) -> Option<u32>;
}

/// Picks the launcher for one add-on; the flag tells whether it runs sandboxed.
pub type LauncherFactory = Arc<dyn Fn(&AddonInfo, bool) -> Box<dyn Launcher> + Send + Sync>;

/// Child processes for sandboxed add-ons, `registry` lookups or library
/// loading for the rest.
pub fn default_launcher_factory(registry: DirectRegistry) -> LauncherFactory {
    Arc::new(move |info: &AddonInfo, sandboxed: bool| -> Box<dyn Launcher> {
        if sandboxed {
            Box::new(PosixLauncher::new(info.id.clone()))
        } else {
            Box::new(DirectLauncher::new(info.id.clone(), registry.clone()))
        }
    })
}

/// Full command line of one add-on launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub launcher_exe: PathBuf,
    pub binary: PathBuf,
    /// Set for direct launches only.
    pub direct_api: Option<String>,
    pub api_version: u32,
    pub uuid: String,
    pub devkit_lib: PathBuf,
    pub devkit_dir: PathBuf,
    pub report_path: PathBuf,
    pub debug: bool,
    pub extra_args: Vec<String>,
    pub rendezvous_dir: PathBuf,
}

impl LaunchCommand {
    pub fn new(launcher_exe: PathBuf, binary: PathBuf, uuid: String) -> Self {
        Self {
            launcher_exe,
            binary,
            direct_api: None,
            api_version: API_VERSION_MAJOR,
            uuid,
            devkit_lib: PathBuf::new(),
            devkit_dir: PathBuf::new(),
            report_path: PathBuf::new(),
            debug: true,
            extra_args: Vec::new(),
            rendezvous_dir: std::env::temp_dir(),
        }
    }

    /// argv in launch order, starting with the launcher executable.
    pub fn to_argv(&self) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec![
            self.launcher_exe.clone().into(),
            "--addon".into(),
            self.binary.clone().into(),
        ];
        if let Some(direct_api) = &self.direct_api {
            argv.push("--direct-api".into());
            argv.push(direct_api.into());
        }
        argv.push("--api".into());
        argv.push(self.api_version.to_string().into());
        argv.push("--main-shared".into());
        argv.push(self.uuid.clone().into());
        argv.push("--dl".into());
        argv.push(self.devkit_lib.clone().into());
        argv.push("--dir".into());
        argv.push(self.devkit_dir.clone().into());
        argv.push("--report-path".into());
        argv.push(self.report_path.clone().into());
        if self.debug {
            argv.push("--debug".into());
        }
        argv.extend(self.extra_args.iter().map(OsString::from));
        argv
    }

    /// Arguments the add-on itself sees: everything after `--addon <binary>`.
    pub fn addon_args(&self) -> Vec<String> {
        self.to_argv()
            .into_iter()
            .skip(3)
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }
}

/// Whether `binary` is a shared library and has to be linked in directly.
pub fn is_shared_library(binary: &Path) -> bool {
    matches!(
        binary.extension().and_then(|ext| ext.to_str()),
        Some("so" | "dylib" | "dll")
    ) || binary
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains(".so."))
}
