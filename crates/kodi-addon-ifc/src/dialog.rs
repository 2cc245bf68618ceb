//! Open add-on settings dialogs.
//!
//! While a dialog is open for an add-on, setting writes from that add-on go
//! into the dialog instead of the settings store, so the user sees them and
//! decides whether they are kept.

use crate::addon::Addon;
use crate::error::{InterfaceError, Result};
use crate::settings::{SettingDefinition, SettingValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DialogId(u64);

struct OpenDialog {
    addon: Arc<Addon>,
    instance_id: u32,
    pending: Vec<(String, String)>,
}

#[derive(Default)]
pub struct SettingsDialogs {
    next_id: AtomicU64,
    open: Mutex<HashMap<DialogId, OpenDialog>>,
}

impl SettingsDialogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, addon: Arc<Addon>, instance_id: u32) -> DialogId {
        let id = DialogId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::debug!(addon = addon.id(), instance_id, "settings dialog opened");
        self.open.lock().insert(
            id,
            OpenDialog {
                addon,
                instance_id,
                pending: Vec::new(),
            },
        );
        id
    }

    pub fn is_open_for(&self, addon_id: &str) -> bool {
        self.open
            .lock()
            .values()
            .any(|dialog| dialog.addon.id() == addon_id)
    }

    /// Hands a value to the newest dialog open for `addon_id`. Returns false
    /// when there is none, the dialog has no such setting, or `value` does
    /// not parse as the setting's type.
    pub fn update_in_active_dialog(&self, addon_id: &str, setting_id: &str, value: &str) -> bool {
        let mut open = self.open.lock();
        let Some((_, dialog)) = open
            .iter_mut()
            .filter(|(_, dialog)| dialog.addon.id() == addon_id)
            .max_by_key(|(id, _)| **id)
        else {
            return false;
        };
        let valid = dialog
            .addon
            .setting_definition(setting_id)
            .is_some_and(|def| SettingValue::parse(def.kind(), value).is_some());
        if !valid {
            return false;
        }
        dialog.pending.retain(|(id, _)| id != setting_id);
        dialog
            .pending
            .push((setting_id.to_string(), value.to_string()));
        true
    }

    pub fn pending_value(&self, dialog: DialogId, setting_id: &str) -> Option<String> {
        self.open
            .lock()
            .get(&dialog)?
            .pending
            .iter()
            .find(|(id, _)| id == setting_id)
            .map(|(_, value)| value.clone())
    }

    /// Closes the dialog; with `save` its pending values are applied and
    /// written to disk. Either every pending value is applied or none is.
    pub fn close(&self, dialog: DialogId, save: bool) -> Result<()> {
        let Some(dialog) = self.open.lock().remove(&dialog) else {
            return Ok(());
        };
        if !save || dialog.pending.is_empty() {
            return Ok(());
        }

        let addon = &dialog.addon;
        let values = dialog
            .pending
            .iter()
            .map(|(id, text)| {
                addon
                    .setting_definition(id)
                    .map(SettingDefinition::kind)
                    .and_then(|kind| SettingValue::parse(kind, text))
                    .map(|value| (id.as_str(), value))
                    .ok_or_else(|| {
                        InterfaceError::Settings(format!("'{text}' is not a valid value for '{id}'"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        addon.with_settings(dialog.instance_id, |settings| {
            for (id, value) in values {
                settings.set(id, value)?;
            }
            settings.save()
        })?
    }
}
