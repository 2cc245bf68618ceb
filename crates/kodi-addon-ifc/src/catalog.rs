//! Installed add-ons and their enabled state.

use crate::addon::AddonInfo;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisabledReason {
    User,
    /// Disabled after a crash, by the user's answer to the crash dialog.
    PermanentFailure,
    Incompatible,
}

/// The add-on database as far as process supervision needs it.
pub trait AddonCatalog: Send + Sync {
    fn addon_info(&self, id: &str) -> Option<Arc<AddonInfo>>;

    fn is_disabled(&self, id: &str) -> bool;

    /// Returns false for unknown add-ons.
    fn disable(&self, id: &str, reason: DisabledReason) -> bool;

    fn enable(&self, id: &str) -> bool;
}

#[derive(Default)]
pub struct InMemoryCatalog {
    addons: RwLock<HashMap<String, Arc<AddonInfo>>>,
    disabled: RwLock<HashMap<String, DisabledReason>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: AddonInfo) -> Arc<AddonInfo> {
        let info = Arc::new(info);
        self.addons
            .write()
            .insert(info.id.clone(), Arc::clone(&info));
        info
    }

    pub fn disabled_reason(&self, id: &str) -> Option<DisabledReason> {
        self.disabled.read().get(id).copied()
    }
}

impl AddonCatalog for InMemoryCatalog {
    fn addon_info(&self, id: &str) -> Option<Arc<AddonInfo>> {
        self.addons.read().get(id).cloned()
    }

    fn is_disabled(&self, id: &str) -> bool {
        self.disabled.read().contains_key(id)
    }

    fn disable(&self, id: &str, reason: DisabledReason) -> bool {
        if !self.addons.read().contains_key(id) {
            return false;
        }
        tracing::info!(addon = id, ?reason, "add-on disabled");
        self.disabled.write().insert(id.to_string(), reason);
        true
    }

    fn enable(&self, id: &str) -> bool {
        self.disabled.write().remove(id).is_some()
    }
}
