//! Error types for the add-on interface layer

use crate::protocol::FuncGroup;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStage {
    Resolve,
    Rendezvous,
    Spawn,
    Handshake,
    Create,
}

impl std::fmt::Display for LaunchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchStage::Resolve => write!(f, "resolving binary"),
            LaunchStage::Rendezvous => write!(f, "opening rendezvous point"),
            LaunchStage::Spawn => write!(f, "spawning process"),
            LaunchStage::Handshake => write!(f, "waiting for handshake"),
            LaunchStage::Create => write!(f, "creating add-on"),
        }
    }
}

#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Add-on launch failed at {stage} stage: {addon_id}\n  Reason: {reason}")]
    LaunchFailed {
        addon_id: String,
        stage: LaunchStage,
        reason: String,
    },

    #[error("Add-on {0} is disabled")]
    AddonDisabled(String),

    #[error("Unknown add-on: {0}")]
    UnknownAddon(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Timeout after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("Call issued from the channel's own pump thread")]
    ReentrantCall,

    #[error("No handler for function {func} in group {group:?}")]
    UnknownFunction { group: FuncGroup, func: u32 },

    #[error("Call failed on the remote side: {0}")]
    Remote(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Thread {0} is not allowed to issue this call")]
    InvalidThread(u64),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Devkit file missing: {0}")]
    DevkitMissing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Settings XML error: {0}")]
    Xml(String),
}

impl From<quick_xml::Error> for InterfaceError {
    fn from(err: quick_xml::Error) -> Self {
        InterfaceError::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for InterfaceError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        InterfaceError::Xml(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, InterfaceError>;
