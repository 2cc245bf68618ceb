//! Command lines of the launcher and of add-on binaries.
//!
//! The host starts `kodi-addon-launcher --addon <binary> <rest...>`; the
//! launcher executes the binary with `<rest...>`, which [`RunnerArgs`]
//! parses.

use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "kodi-addon-launcher")]
#[command(about = "Starts a sandboxed Kodi add-on binary")]
pub struct LauncherArgs {
    /// Add-on binary to execute.
    #[arg(long)]
    pub addon: PathBuf,

    /// Arguments handed to the add-on unchanged.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

impl LauncherArgs {
    pub fn debug(&self) -> bool {
        self.rest.iter().any(|arg| arg == "--debug")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "kodi-addon")]
#[command(about = "Kodi binary add-on")]
pub struct RunnerArgs {
    /// Set when the host links the add-on in directly.
    #[arg(long = "direct-api")]
    pub direct_api: Option<String>,

    /// Major API version of the host.
    #[arg(long)]
    pub api: u32,

    /// Process uuid; names the rendezvous endpoints.
    #[arg(long = "main-shared")]
    pub uuid: String,

    #[arg(long = "dl", default_value = "")]
    pub devkit_lib: String,

    #[arg(long = "dir", default_value = "")]
    pub devkit_dir: String,

    /// Where crash reports go.
    #[arg(long = "report-path", default_value = "")]
    pub report_path: String,

    #[arg(long)]
    pub debug: bool,

    /// Caller supplied extras.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub extra: Vec<String>,
}
