//! IPC protocol between host and add-on.
//!
//! Every exchange is an [`Envelope`]. A call carries a [`Frame`] selecting one
//! handler by `(group, func)` together with the bincode encoding of that
//! function's fixed input tuple. The reply carries the encoded output tuple.

use crate::arena::InstanceToken;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Instance id of single-instance add-ons.
pub const ADDON_SINGLETON_INSTANCE_ID: u32 = 0;
/// Instance id used where no instance applies.
pub const ADDON_INSTANCE_ID_UNUSED: u32 = 0;
/// Instance id whose settings live in the add-on's main `settings.xml`.
pub const ADDON_SETTINGS_ID: u32 = 0;

/// Major protocol version passed with `--api`.
pub const API_VERSION_MAJOR: u32 = 1;

/// Upper bound for one encoded envelope.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Environment variable telling the child where socket endpoints live.
pub const RENDEZVOUS_DIR_ENV: &str = "KODI_ADDON_RENDEZVOUS_DIR";

/// Thread id of the primary channel of every process.
pub const PRIMARY_THREAD_ID: u64 = 0;

/// Function groups. The discriminant is the wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum FuncGroup {
    /// Reserved for channel management (new threads, kill).
    Main = 0,
    AddonBase = 1,
    General = 2,
    AddonInstance = 3,
    Filesystem = 4,
    Network = 5,
}

impl FuncGroup {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(FuncGroup::Main),
            1 => Some(FuncGroup::AddonBase),
            2 => Some(FuncGroup::General),
            3 => Some(FuncGroup::AddonInstance),
            4 => Some(FuncGroup::Filesystem),
            5 => Some(FuncGroup::Network),
            _ => None,
        }
    }
}

/// One call: handler selector plus encoded input tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub group: FuncGroup,
    pub func: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(group: FuncGroup, func: u32, payload: Vec<u8>) -> Self {
        Self {
            group,
            func,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    Ok,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    /// First envelope sent by the add-on on every new connection.
    Hello { uuid: String, thread_id: u64 },
    Call {
        nonce: u64,
        frame: Frame,
        expects_reply: bool,
    },
    Reply {
        nonce: u64,
        status: ReplyStatus,
        payload: Vec<u8>,
    },
}

/// Result code returned by add-on level calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddonStatus {
    Ok,
    LostConnection,
    NeedRestart,
    NeedSettings,
    Unknown,
    PermanentFailure,
    NotImplemented,
}

impl AddonStatus {
    pub fn is_ok(self) -> bool {
        self == AddonStatus::Ok
    }
}

impl std::fmt::Display for AddonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AddonStatus::Ok => "ADDON_STATUS_OK",
            AddonStatus::LostConnection => "ADDON_STATUS_LOST_CONNECTION",
            AddonStatus::NeedRestart => "ADDON_STATUS_NEED_RESTART",
            AddonStatus::NeedSettings => "ADDON_STATUS_NEED_SETTINGS",
            AddonStatus::Unknown => "ADDON_STATUS_UNKNOWN",
            AddonStatus::PermanentFailure => "ADDON_STATUS_PERMANENT_FAILURE",
            AddonStatus::NotImplemented => "ADDON_STATUS_NOT_IMPLEMENTED",
        };
        f.write_str(name)
    }
}

/// Instance type tag sent with instance creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceKind {
    AudioDecoder,
    AudioEncoder,
    Game,
    ImageDecoder,
    Inputstream,
    Peripheral,
    Pvr,
    Screensaver,
    Visualization,
    Vfs,
    VideoCodec,
    Web,
}

/// Fixed instance descriptor handed to the add-on on instance creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: u32,
    pub unique_work_id: String,
    pub kind: InstanceKind,
    /// Opaque token the add-on passes back when calling into the host.
    pub backend: InstanceToken,
    pub parent: Option<InstanceToken>,
}

/// Log severities accepted from add-ons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

/// Socket endpoint for one channel of one process.
pub fn endpoint_path(dir: &Path, uuid: &str, thread_id: u64) -> PathBuf {
    if thread_id == PRIMARY_THREAD_ID {
        dir.join(format!("{uuid}.sock"))
    } else {
        dir.join(format!("{uuid}-{thread_id}.sock"))
    }
}

/// Rendezvous directory as seen by the child process.
pub fn rendezvous_dir_from_env() -> PathBuf {
    std::env::var_os(RENDEZVOUS_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}
