//! Host side handlers for calls made by add-ons.

use crate::api::general::Log;
use crate::api::instance::{
    GetSettingBool, GetSettingFloat, GetSettingInt, GetSettingString, GetUserPath,
    IsSettingUsingDefault, SetSettingBool, SetSettingFloat, SetSettingInt, SetSettingString,
};
use crate::arena::InstanceToken;
use crate::dispatch::HandlerTable;
use crate::error::{InterfaceError, Result};
use crate::instance::InstanceCore;
use crate::process::RunningProcess;
use crate::protocol::LogLevel;
use std::sync::Arc;

/// Context of one add-on to host call.
pub(crate) struct HostCall {
    pub(crate) process: Arc<RunningProcess>,
    pub(crate) thread_id: u64,
}

impl HostCall {
    /// Resolves an instance token, refusing instances of other add-ons.
    fn instance(&self, token: InstanceToken) -> Result<Arc<InstanceCore>> {
        let core = self
            .process
            .shared()
            .arena
            .get(token)
            .ok_or_else(|| InterfaceError::Protocol(format!("unknown instance {token}")))?;
        if core.addon_id() != self.process.addon_id() {
            return Err(InterfaceError::Protocol(format!(
                "instance {token} does not belong to {}",
                self.process.addon_id()
            )));
        }
        Ok(core)
    }
}

pub(crate) fn host_handlers() -> HandlerTable<HostCall> {
    let mut table = HandlerTable::new();
    table
        .register::<Log, _>(|call: &HostCall, (level, message)| {
            let addon = call.process.addon_id();
            let thread = call.thread_id;
            match level {
                LogLevel::Debug => tracing::debug!(addon, thread, "{message}"),
                LogLevel::Info => tracing::info!(addon, thread, "{message}"),
                LogLevel::Warning => tracing::warn!(addon, thread, "{message}"),
                LogLevel::Error | LogLevel::Fatal => tracing::error!(addon, thread, "{message}"),
            }
            Ok(())
        })
        .register::<GetUserPath, _>(|call: &HostCall, token| {
            Ok(call
                .instance(token)?
                .instance_user_path()
                .map(|path| path.to_string_lossy().into_owned()))
        })
        .register::<IsSettingUsingDefault, _>(|call: &HostCall, (token, id)| {
            Ok(call.instance(token)?.is_instance_setting_using_default(&id))
        })
        .register::<GetSettingBool, _>(|call: &HostCall, (token, id)| {
            Ok(call.instance(token)?.get_instance_setting_bool(&id))
        })
        .register::<GetSettingInt, _>(|call: &HostCall, (token, id)| {
            Ok(call.instance(token)?.get_instance_setting_int(&id))
        })
        .register::<GetSettingFloat, _>(|call: &HostCall, (token, id)| {
            Ok(call.instance(token)?.get_instance_setting_float(&id))
        })
        .register::<GetSettingString, _>(|call: &HostCall, (token, id)| {
            Ok(call.instance(token)?.get_instance_setting_string(&id))
        })
        .register::<SetSettingBool, _>(|call: &HostCall, (token, id, value)| {
            Ok(call.instance(token)?.set_instance_setting_bool(&id, value))
        })
        .register::<SetSettingInt, _>(|call: &HostCall, (token, id, value)| {
            Ok(call.instance(token)?.set_instance_setting_int(&id, value))
        })
        .register::<SetSettingFloat, _>(|call: &HostCall, (token, id, value)| {
            Ok(call.instance(token)?.set_instance_setting_float(&id, value))
        })
        .register::<SetSettingString, _>(|call: &HostCall, (token, id, value)| {
            Ok(call.instance(token)?.set_instance_setting_string(&id, &value))
        });
    table
}
