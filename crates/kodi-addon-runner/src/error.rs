//! Error types for the add-on side runner

use kodi_addon_ifc::{AddonStatus, InterfaceError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Invalid command line: {0}")]
    Args(#[from] clap::Error),

    #[error("API version mismatch: host speaks {host}, add-on speaks {addon}")]
    ApiMismatch { host: u32, addon: u32 },

    #[error("Add-on refused to start: {0}")]
    StartFailed(AddonStatus),

    #[error("Failed to execute {path}: {source}")]
    Exec {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Interface(#[from] InterfaceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
