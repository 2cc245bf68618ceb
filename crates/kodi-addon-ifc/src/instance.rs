//! Host side handle of one add-on instance.
//!
//! An [`InstanceHandler`] is what host features (a screensaver, a PVR
//! client, an audio decoder...) hold. Creating the instance attaches it to
//! the add-on's process, launching that process if needed; destroying or
//! dropping the handler detaches it again. The handler is registered in the
//! controller's arena so the add-on can refer to it by token in callbacks.

use crate::addon::{Addon, AddonInfo, InstanceUse};
use crate::api::addon_base::{CreateInstance, DestroyInstance};
use crate::arena::InstanceToken;
use crate::controller::Controller;
use crate::error::{InterfaceError, Result};
use crate::launcher::ChildStatus;
use crate::process::RunningProcess;
use crate::protocol::{AddonStatus, InstanceInfo, InstanceKind, ADDON_INSTANCE_ID_UNUSED};
use crate::settings::{AddonSettings, SettingValue};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives the report that an instance's process went away.
pub trait StopObserver: Send + Sync {
    fn stop_report(&self, addon_id: &str, status: ChildStatus);
}

struct Meta {
    instance_id: u32,
    unique_work_id: Option<String>,
    parent: Option<InstanceToken>,
    observer: Option<Arc<dyn StopObserver>>,
}

#[derive(Default)]
struct Attachment {
    process: Option<Arc<RunningProcess>>,
    addon_instance: u64,
}

pub(crate) struct InstanceCore {
    token: InstanceToken,
    controller: Controller,
    info: Arc<AddonInfo>,
    kind: InstanceKind,
    meta: RwLock<Meta>,
    attachment: Mutex<Attachment>,
    /// Serialises create and destroy of this instance.
    lifecycle: Mutex<()>,
    process_lost: AtomicBool,
    stop_reported: AtomicBool,
}

impl InstanceCore {
    pub(crate) fn token(&self) -> InstanceToken {
        self.token
    }

    pub(crate) fn addon_id(&self) -> &str {
        &self.info.id
    }

    fn instance_id(&self) -> u32 {
        self.meta.read().instance_id
    }

    fn instance_info(&self) -> InstanceInfo {
        let meta = self.meta.read();
        InstanceInfo {
            instance_id: meta.instance_id,
            unique_work_id: meta
                .unique_work_id
                .clone()
                .unwrap_or_else(|| self.token.to_string()),
            kind: self.kind,
            backend: self.token,
            parent: meta.parent,
        }
    }

    fn process(&self) -> Option<Arc<RunningProcess>> {
        self.attachment.lock().process.clone()
    }

    fn addon(&self) -> Option<Arc<Addon>> {
        self.process().map(|process| Arc::clone(process.addon()))
    }

    fn create_instance(self: &Arc<Self>) -> AddonStatus {
        let _lifecycle = self.lifecycle.lock();
        if self.process().is_some() {
            tracing::warn!(addon = self.addon_id(), "instance already created");
            return AddonStatus::Ok;
        }

        let info = self.instance_info();
        if info.instance_id > 0 && self.info.instance_use() == InstanceUse::None {
            tracing::error!(
                addon = self.addon_id(),
                instance_id = info.instance_id,
                "add-on does not support multiple instances"
            );
            return AddonStatus::NotImplemented;
        }

        let process = match self.controller.acquire_process(&self.info, self, &info) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(
                    addon = self.addon_id(),
                    "failed to get add-on process during instance creation: {e}"
                );
                return AddonStatus::Unknown;
            }
        };
        self.process_lost.store(false, Ordering::SeqCst);
        self.stop_reported.store(false, Ordering::SeqCst);
        self.attachment.lock().process = Some(Arc::clone(&process));

        let created = {
            let _create = self.controller.shared().create_lock.lock();
            process.call::<CreateInstance>(&info)
        };
        let status = match created {
            Ok((AddonStatus::Ok, addon_instance)) => {
                self.attachment.lock().addon_instance = addon_instance;
                return AddonStatus::Ok;
            }
            Ok((status, _)) => status,
            Err(e) => {
                tracing::error!(addon = self.addon_id(), "instance creation call failed: {e}");
                AddonStatus::Unknown
            }
        };

        tracing::error!(
            addon = self.addon_id(),
            %status,
            "add-on returned bad status during instance creation"
        );
        *self.attachment.lock() = Attachment::default();
        self.controller.release_process(&process, self.token);
        status
    }

    fn destroy_instance(&self) {
        let _lifecycle = self.lifecycle.lock();
        let Some(process) = self.process() else {
            return;
        };

        if !self.process_lost.load(Ordering::SeqCst) {
            let addon_instance = self.attachment.lock().addon_instance;
            if let Err(e) = process.call::<DestroyInstance>(&(self.instance_info(), addon_instance)) {
                tracing::warn!(addon = self.addon_id(), "instance destroy call failed: {e}");
            }
        }

        *self.attachment.lock() = Attachment::default();
        self.controller.release_process(&process, self.token);
    }

    pub(crate) fn on_stop_report(&self, status: ChildStatus) {
        self.process_lost.store(true, Ordering::SeqCst);
        if self.stop_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        let observer = self.meta.read().observer.clone();
        if let Some(observer) = observer {
            observer.stop_report(self.addon_id(), status);
        }
    }

    fn with_settings<R>(&self, f: impl FnOnce(&mut AddonSettings) -> R) -> Result<R> {
        let addon = self
            .addon()
            .ok_or_else(|| InterfaceError::Settings("instance not created".to_string()))?;
        addon.with_settings(self.instance_id(), f)
    }

    fn setting(&self, id: &str) -> Option<SettingValue> {
        match self.with_settings(|settings| settings.get(id).cloned()) {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                tracing::error!(addon = self.addon_id(), "can't find setting '{id}'");
                None
            }
            Err(e) => {
                tracing::error!(addon = self.addon_id(), "couldn't get settings: {e}");
                None
            }
        }
    }

    fn wrong_type(&self, id: &str, expected: &str) {
        tracing::error!(addon = self.addon_id(), "setting '{id}' is not a {expected}");
    }

    pub(crate) fn instance_user_path(&self) -> Option<PathBuf> {
        let path = &self.info.profile_path;
        if path.as_os_str().is_empty() {
            return None;
        }
        if let Err(e) = std::fs::create_dir_all(path) {
            tracing::error!(addon = self.addon_id(), "failed to create {}: {e}", path.display());
        }
        Some(path.clone())
    }

    pub(crate) fn is_instance_setting_using_default(&self, id: &str) -> bool {
        match self.with_settings(|settings| settings.is_default(id)) {
            Ok(Some(is_default)) => is_default,
            Ok(None) => {
                tracing::error!(addon = self.addon_id(), "can't find setting '{id}'");
                false
            }
            Err(e) => {
                tracing::error!(addon = self.addon_id(), "couldn't get settings: {e}");
                false
            }
        }
    }

    pub(crate) fn get_instance_setting_bool(&self, id: &str) -> Option<bool> {
        match self.setting(id)? {
            SettingValue::Bool(value) => Some(value),
            _ => {
                self.wrong_type(id, "boolean");
                None
            }
        }
    }

    /// Number settings are truncated.
    pub(crate) fn get_instance_setting_int(&self, id: &str) -> Option<i32> {
        match self.setting(id)? {
            SettingValue::Int(value) => Some(value),
            SettingValue::Number(value) => Some(value as i32),
            _ => {
                self.wrong_type(id, "integer");
                None
            }
        }
    }

    pub(crate) fn get_instance_setting_float(&self, id: &str) -> Option<f32> {
        match self.setting(id)? {
            SettingValue::Number(value) => Some(value as f32),
            _ => {
                self.wrong_type(id, "number");
                None
            }
        }
    }

    pub(crate) fn get_instance_setting_string(&self, id: &str) -> Option<String> {
        match self.setting(id)? {
            SettingValue::String(value) => Some(value),
            _ => {
                self.wrong_type(id, "string");
                None
            }
        }
    }

    /// An open settings dialog takes the value; otherwise it is stored and
    /// saved right away.
    fn set_setting(&self, id: &str, value: SettingValue) -> bool {
        let dialogs = &self.controller.shared().dialogs;
        if dialogs.update_in_active_dialog(self.addon_id(), id, &value.to_string()) {
            return true;
        }

        let stored = self.with_settings(|settings| {
            settings.set(id, value)?;
            settings.save()
        });
        match stored {
            Ok(Ok(())) => true,
            Ok(Err(e)) | Err(e) => {
                tracing::error!(addon = self.addon_id(), "failed to set '{id}': {e}");
                false
            }
        }
    }

    pub(crate) fn set_instance_setting_bool(&self, id: &str, value: bool) -> bool {
        self.set_setting(id, SettingValue::Bool(value))
    }

    pub(crate) fn set_instance_setting_int(&self, id: &str, value: i32) -> bool {
        self.set_setting(id, SettingValue::Int(value))
    }

    pub(crate) fn set_instance_setting_float(&self, id: &str, value: f32) -> bool {
        self.set_setting(id, SettingValue::Number(f64::from(value)))
    }

    pub(crate) fn set_instance_setting_string(&self, id: &str, value: &str) -> bool {
        self.set_setting(id, SettingValue::String(value.to_string()))
    }
}

pub struct InstanceHandler {
    core: Arc<InstanceCore>,
}

impl InstanceHandler {
    pub fn new(controller: &Controller, info: Arc<AddonInfo>, kind: InstanceKind) -> Self {
        let core = Arc::new_cyclic(|core| InstanceCore {
            token: controller.shared().arena.insert_weak(core.clone()),
            controller: controller.clone(),
            info,
            kind,
            meta: RwLock::new(Meta {
                instance_id: ADDON_INSTANCE_ID_UNUSED,
                unique_work_id: None,
                parent: None,
                observer: None,
            }),
            attachment: Mutex::new(Attachment::default()),
            lifecycle: Mutex::new(()),
            process_lost: AtomicBool::new(false),
            stop_reported: AtomicBool::new(false),
        });
        Self { core }
    }

    pub fn with_instance_id(self, instance_id: u32) -> Self {
        self.core.meta.write().instance_id = instance_id;
        self
    }

    /// Defaults to the handler's token.
    pub fn with_unique_work_id(self, unique_work_id: impl Into<String>) -> Self {
        self.core.meta.write().unique_work_id = Some(unique_work_id.into());
        self
    }

    pub fn with_parent(self, parent: InstanceToken) -> Self {
        self.core.meta.write().parent = Some(parent);
        self
    }

    pub fn with_observer(self, observer: Arc<dyn StopObserver>) -> Self {
        self.core.meta.write().observer = Some(observer);
        self
    }

    pub fn token(&self) -> InstanceToken {
        self.core.token
    }

    pub fn addon_id(&self) -> &str {
        self.core.addon_id()
    }

    pub fn addon_info(&self) -> &Arc<AddonInfo> {
        &self.core.info
    }

    pub fn kind(&self) -> InstanceKind {
        self.core.kind
    }

    pub fn instance_id(&self) -> u32 {
        self.core.instance_id()
    }

    pub fn unique_work_id(&self) -> String {
        self.core.instance_info().unique_work_id
    }

    pub fn instance_info(&self) -> InstanceInfo {
        self.core.instance_info()
    }

    pub fn is_created(&self) -> bool {
        self.core.process().is_some()
    }

    /// Set once the process crashed or was found unresponsive.
    pub fn is_process_lost(&self) -> bool {
        self.core.process_lost.load(Ordering::SeqCst)
    }

    pub fn process(&self) -> Option<Arc<RunningProcess>> {
        self.core.process()
    }

    pub fn addon(&self) -> Option<Arc<Addon>> {
        self.core.addon()
    }

    /// Add-on side handle returned by the instance create call.
    pub fn addon_instance(&self) -> u64 {
        self.core.attachment.lock().addon_instance
    }

    pub fn create_instance(&self) -> AddonStatus {
        self.core.create_instance()
    }

    pub fn destroy_instance(&self) {
        self.core.destroy_instance();
    }

    /// The add-on profile directory, created if missing.
    pub fn instance_user_path(&self) -> Option<PathBuf> {
        self.core.instance_user_path()
    }

    pub fn is_instance_setting_using_default(&self, id: &str) -> bool {
        self.core.is_instance_setting_using_default(id)
    }

    pub fn get_instance_setting_bool(&self, id: &str) -> Option<bool> {
        self.core.get_instance_setting_bool(id)
    }

    pub fn get_instance_setting_int(&self, id: &str) -> Option<i32> {
        self.core.get_instance_setting_int(id)
    }

    pub fn get_instance_setting_float(&self, id: &str) -> Option<f32> {
        self.core.get_instance_setting_float(id)
    }

    pub fn get_instance_setting_string(&self, id: &str) -> Option<String> {
        self.core.get_instance_setting_string(id)
    }

    pub fn set_instance_setting_bool(&self, id: &str, value: bool) -> bool {
        self.core.set_instance_setting_bool(id, value)
    }

    pub fn set_instance_setting_int(&self, id: &str, value: i32) -> bool {
        self.core.set_instance_setting_int(id, value)
    }

    pub fn set_instance_setting_float(&self, id: &str, value: f32) -> bool {
        self.core.set_instance_setting_float(id, value)
    }

    pub fn set_instance_setting_string(&self, id: &str, value: &str) -> bool {
        self.core.set_instance_setting_string(id, value)
    }
}

impl Drop for InstanceHandler {
    fn drop(&mut self) {
        self.core.destroy_instance();
        self.core.controller.shared().arena.remove(self.core.token);
    }
}
