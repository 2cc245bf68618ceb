//! Add-on side of the boundary.
//!
//! An add-on is an [`AddonEntry`]: something that answers host frames. Most
//! add-ons implement the higher level [`AddonBase`] instead and wrap it in
//! [`AddonBaseEntry`]. Calls back into the host go through a [`HostLink`],
//! wrapped by [`HostApi`] for typed access.
//!
//! The same entry serves both launch modes: the runner feeds it frames read
//! from the socket, the direct launcher calls it in-process.

use crate::api::addon_base::{Create, CreateInstance, Destroy, DestroyInstance};
use crate::api::general::Log;
use crate::api::instance as callbacks;
use crate::api::{self, ApiFunction};
use crate::arena::InstanceToken;
use crate::dispatch::HandlerTable;
use crate::error::{InterfaceError, Result};
use crate::protocol::{AddonStatus, Frame, InstanceInfo, LogLevel};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// One add-on thread's connection back to the host.
///
/// A link must only be used from the thread it belongs to; worker threads
/// ask for their own with [`HostLink::create_thread_link`].
pub trait HostLink: Send + Sync {
    fn thread_id(&self) -> u64;

    fn call(&self, frame: Frame) -> Result<Vec<u8>>;

    fn create_thread_link(&self) -> Result<Arc<dyn HostLink>>;

    /// Tells the host this worker thread is done with its channel.
    fn release(&self) -> Result<()>;
}

pub trait AddonEntry: Send + Sync {
    /// Called once before the first frame with the launch arguments.
    fn start(&self, args: &[String], host: Arc<dyn HostLink>) -> AddonStatus;

    fn handle(&self, frame: &Frame) -> Result<Vec<u8>>;

    /// Host asked the add-on to stop its own workers before being killed.
    fn stop(&self) {}
}

/// Typed calls into the host.
#[derive(Clone)]
pub struct HostApi {
    link: Arc<dyn HostLink>,
}

impl HostApi {
    pub fn new(link: Arc<dyn HostLink>) -> Self {
        Self { link }
    }

    pub fn call<F: ApiFunction>(&self, input: &F::Input) -> Result<F::Output> {
        let payload = self.link.call(api::frame::<F>(input)?)?;
        api::decode(&payload)
    }

    pub fn thread_id(&self) -> u64 {
        self.link.thread_id()
    }

    /// Host API for a new worker thread, with its own channel.
    pub fn for_new_thread(&self) -> Result<HostApi> {
        Ok(HostApi::new(self.link.create_thread_link()?))
    }

    pub fn release_thread(self) -> Result<()> {
        self.link.release()
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> Result<()> {
        self.call::<Log>(&(level, message.into()))
    }

    pub fn user_path(&self, instance: InstanceToken) -> Result<Option<PathBuf>> {
        Ok(self
            .call::<callbacks::GetUserPath>(&instance)?
            .map(PathBuf::from))
    }

    pub fn is_setting_using_default(&self, instance: InstanceToken, id: &str) -> Result<bool> {
        self.call::<callbacks::IsSettingUsingDefault>(&(instance, id.to_string()))
    }

    pub fn setting_bool(&self, instance: InstanceToken, id: &str) -> Result<Option<bool>> {
        self.call::<callbacks::GetSettingBool>(&(instance, id.to_string()))
    }

    pub fn setting_int(&self, instance: InstanceToken, id: &str) -> Result<Option<i32>> {
        self.call::<callbacks::GetSettingInt>(&(instance, id.to_string()))
    }

    pub fn setting_float(&self, instance: InstanceToken, id: &str) -> Result<Option<f32>> {
        self.call::<callbacks::GetSettingFloat>(&(instance, id.to_string()))
    }

    pub fn setting_string(&self, instance: InstanceToken, id: &str) -> Result<Option<String>> {
        self.call::<callbacks::GetSettingString>(&(instance, id.to_string()))
    }

    pub fn set_setting_bool(&self, instance: InstanceToken, id: &str, value: bool) -> Result<bool> {
        self.call::<callbacks::SetSettingBool>(&(instance, id.to_string(), value))
    }

    pub fn set_setting_int(&self, instance: InstanceToken, id: &str, value: i32) -> Result<bool> {
        self.call::<callbacks::SetSettingInt>(&(instance, id.to_string(), value))
    }

    pub fn set_setting_float(&self, instance: InstanceToken, id: &str, value: f32) -> Result<bool> {
        self.call::<callbacks::SetSettingFloat>(&(instance, id.to_string(), value))
    }

    pub fn set_setting_string(
        &self,
        instance: InstanceToken,
        id: &str,
        value: &str,
    ) -> Result<bool> {
        self.call::<callbacks::SetSettingString>(&(instance, id.to_string(), value.to_string()))
    }
}

/// Add-on lifecycle as seen by add-on authors.
pub trait AddonBase: Send + Sync + 'static {
    fn create(&self, _host: &HostApi, _first_instance: &InstanceInfo) -> AddonStatus {
        AddonStatus::Ok
    }

    fn destroy(&self) {}

    /// Returns the add-on side handle of the new instance.
    fn create_instance(
        &self,
        host: &HostApi,
        info: &InstanceInfo,
    ) -> std::result::Result<u64, AddonStatus>;

    fn destroy_instance(&self, _info: &InstanceInfo, _instance: u64) {}

    fn stop(&self) {}
}

struct AddonContext<A> {
    addon: A,
    host: OnceLock<HostApi>,
}

impl<A> AddonContext<A> {
    fn host(&self) -> Result<&HostApi> {
        self.host
            .get()
            .ok_or_else(|| InterfaceError::ChannelClosed("add-on not started".to_string()))
    }
}

/// Adapts an [`AddonBase`] to the frame level [`AddonEntry`].
pub struct AddonBaseEntry<A: AddonBase> {
    ctx: AddonContext<A>,
    table: HandlerTable<AddonContext<A>>,
}

impl<A: AddonBase> AddonBaseEntry<A> {
    pub fn new(addon: A) -> Self {
        let mut table = HandlerTable::new();
        table
            .register::<Create, _>(|ctx: &AddonContext<A>, first| {
                Ok(ctx.addon.create(ctx.host()?, &first))
            })
            .register::<Destroy, _>(|ctx: &AddonContext<A>, ()| {
                ctx.addon.destroy();
                Ok(())
            })
            .register::<CreateInstance, _>(|ctx: &AddonContext<A>, info| {
                Ok(match ctx.addon.create_instance(ctx.host()?, &info) {
                    Ok(handle) => (AddonStatus::Ok, handle),
                    Err(status) => (status, 0),
                })
            })
            .register::<DestroyInstance, _>(|ctx: &AddonContext<A>, (info, handle)| {
                ctx.addon.destroy_instance(&info, handle);
                Ok(())
            });

        Self {
            ctx: AddonContext {
                addon,
                host: OnceLock::new(),
            },
            table,
        }
    }

    pub fn addon(&self) -> &A {
        &self.ctx.addon
    }
}

impl<A: AddonBase> AddonEntry for AddonBaseEntry<A> {
    fn start(&self, _args: &[String], host: Arc<dyn HostLink>) -> AddonStatus {
        if self.ctx.host.set(HostApi::new(host)).is_err() {
            tracing::warn!("add-on entry started twice, keeping first host link");
        }
        AddonStatus::Ok
    }

    fn handle(&self, frame: &Frame) -> Result<Vec<u8>> {
        self.table.dispatch(&self.ctx, frame)
    }

    fn stop(&self) {
        self.ctx.addon.stop();
    }
}
