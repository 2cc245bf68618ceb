//! Centralized error type for the kodi-addons umbrella crate.
//!
//! Wraps the host and add-on side errors so `?` propagates naturally across
//! crate boundaries.

use kodi_addon_ifc::AddonStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Interface(#[from] kodi_addon_ifc::InterfaceError),

    #[error("Runner: {0}")]
    Runner(#[from] kodi_addon_runner::RunnerError),

    #[error("Add-on {addon_id} refused the instance: {status}")]
    InstanceRefused { addon_id: String, status: AddonStatus },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
