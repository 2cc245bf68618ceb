//! AddonHost that owns the add-on controller

use crate::{AddonHostBuilder, Error, Result};
use kodi_addon_ifc::{
    AddonCatalog, AddonInfo, Controller, InstanceHandler, InstanceKind, InterfaceError,
    ProcessInfo, RunningProcess,
};
use std::sync::Arc;

/// Host side entry point for binary add-ons.
///
/// Wraps a started [`Controller`]. Instance handles created here share one
/// process per add-on; dropping the host stops every process it launched.
pub struct AddonHost {
    controller: Controller,
}

impl AddonHost {
    pub fn builder(catalog: Arc<dyn AddonCatalog>) -> AddonHostBuilder {
        AddonHostBuilder::new(catalog)
    }

    pub(crate) fn from_controller(controller: Controller) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn catalog(&self) -> &Arc<dyn AddonCatalog> {
        self.controller.catalog()
    }

    fn addon_info(&self, addon_id: &str) -> Result<Arc<AddonInfo>> {
        self.catalog()
            .addon_info(addon_id)
            .ok_or_else(|| InterfaceError::UnknownAddon(addon_id.to_string()).into())
    }

    /// Handle for an instance of `addon_id`, not yet created in the add-on.
    pub fn instance(&self, addon_id: &str, kind: InstanceKind) -> Result<InstanceHandler> {
        Ok(InstanceHandler::new(
            &self.controller,
            self.addon_info(addon_id)?,
            kind,
        ))
    }

    /// Handle for an instance of `addon_id`, created in the add-on's process.
    pub fn create_instance(&self, addon_id: &str, kind: InstanceKind) -> Result<InstanceHandler> {
        let handler = self.instance(addon_id, kind)?;
        let status = handler.create_instance();
        if !status.is_ok() {
            return Err(Error::InstanceRefused {
                addon_id: addon_id.to_string(),
                status,
            });
        }
        Ok(handler)
    }

    /// Run an add-on that has no instances, e.g. a helper executable.
    pub fn launch_addon(
        &self,
        addon_id: &str,
        args: &[String],
        wait_for_exit: bool,
    ) -> Result<Arc<RunningProcess>> {
        let info = self.addon_info(addon_id)?;
        Ok(self.controller.launch_addon(&info, args, wait_for_exit)?)
    }

    pub fn processes(&self) -> Vec<ProcessInfo> {
        self.controller.process_info()
    }

    /// Stop every add-on without reporting crashes.
    pub fn shutdown(&self) {
        tracing::info!("stopping add-on host");
        self.controller.begin_system_stop();
        self.controller.stop();
    }
}

impl Drop for AddonHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}
