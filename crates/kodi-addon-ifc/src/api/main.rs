//! Reserved channel-management group.

use serde::{Deserialize, Serialize};

/// Reply to [`CreateForNewThread`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewThread {
    pub thread_id: u64,
    /// Socket endpoint to connect the new channel to; `None` for direct add-ons.
    pub endpoint: Option<String>,
}

crate::api_schema! {
    group Main;
    /// Host asks the add-on to stop its workers; input is the process uuid.
    0 => KillChild(String) -> ();
    /// Add-on asks for a channel for one of its own worker threads.
    1 => CreateForNewThread(u64) -> NewThread;
    2 => DestroyForThread(u64) -> ();
}
