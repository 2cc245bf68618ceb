//! In-process launcher for non-sandboxed add-ons.

use super::{ChildStatus, LaunchCommand, LaunchOutcome, Launcher};
use crate::entry::AddonEntry;
use crate::error::{InterfaceError, LaunchStage, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Symbol a direct add-on library exports to hand out its entry.
///
/// Its type is `fn() -> Box<dyn AddonEntry>`, so the library must be built
/// with the same toolchain as the host.
pub const DIRECT_ENTRY_SYMBOL: &[u8] = b"kodi_addon_direct_entry";

type DirectEntryFn = fn() -> Box<dyn AddonEntry>;

pub type DirectFactory = Arc<dyn Fn() -> Arc<dyn AddonEntry> + Send + Sync>;

/// Add-ons linked into the host binary, keyed by their library path.
#[derive(Clone, Default)]
pub struct DirectRegistry {
    factories: Arc<RwLock<HashMap<PathBuf, DirectFactory>>>,
}

impl DirectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, binary: impl Into<PathBuf>, factory: F)
    where
        F: Fn() -> Arc<dyn AddonEntry> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(binary.into(), Arc::new(factory));
    }

    pub fn contains(&self, binary: &Path) -> bool {
        self.factories.read().contains_key(binary)
    }

    fn create(&self, binary: &Path) -> Option<Arc<dyn AddonEntry>> {
        let factory = self.factories.read().get(binary).cloned()?;
        Some(factory())
    }
}

/// Resolves the add-on entry; starting it is up to the owning process,
/// which supplies the host link.
pub struct DirectLauncher {
    addon_id: String,
    registry: DirectRegistry,
    entry: Option<Arc<dyn AddonEntry>>,
    // Declared after `entry` so the entry is dropped before its code is unloaded.
    library: Option<libloading::Library>,
    status: ChildStatus,
}

impl DirectLauncher {
    pub fn new(addon_id: impl Into<String>, registry: DirectRegistry) -> Self {
        Self {
            addon_id: addon_id.into(),
            registry,
            entry: None,
            library: None,
            status: ChildStatus::NotStarted,
        }
    }

    fn load_library(&mut self, binary: &Path) -> Result<Arc<dyn AddonEntry>> {
        let fail = |reason: String| InterfaceError::LaunchFailed {
            addon_id: self.addon_id.clone(),
            stage: LaunchStage::Spawn,
            reason,
        };

        // SAFETY: loading runs the library's initialisers; direct add-ons are
        // trusted code by definition of running unsandboxed.
        let library = unsafe { libloading::Library::new(binary) }.map_err(|e| fail(e.to_string()))?;
        // SAFETY: the symbol type is fixed by DIRECT_ENTRY_SYMBOL's contract.
        let entry = unsafe {
            let constructor: libloading::Symbol<DirectEntryFn> = library
                .get(DIRECT_ENTRY_SYMBOL)
                .map_err(|e| fail(e.to_string()))?;
            constructor()
        };
        self.library = Some(library);
        Ok(Arc::from(entry))
    }
}

impl Launcher for DirectLauncher {
    fn launch(&mut self, command: &LaunchCommand) -> Result<LaunchOutcome> {
        let entry = match self.registry.create(&command.binary) {
            Some(entry) => entry,
            None => self.load_library(&command.binary)?,
        };

        self.entry = Some(Arc::clone(&entry));
        self.status = ChildStatus::Running;
        Ok(LaunchOutcome::Direct(entry))
    }

    fn supports_non_blocking(&self, _binary: &Path) -> bool {
        true
    }

    fn kill(&mut self, _wait: bool) -> bool {
        if self.status != ChildStatus::Running {
            return false;
        }
        self.entry = None;
        self.status = ChildStatus::ExitedNormally;
        tracing::debug!(addon = %self.addon_id, "direct add-on released");
        true
    }

    fn process_active(&mut self) -> ChildStatus {
        self.status
    }

    fn stack_trace(&self) -> String {
        String::new()
    }

    fn main_pid(&self) -> Option<u32> {
        (self.status == ChildStatus::Running).then(std::process::id)
    }
}
