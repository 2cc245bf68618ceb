//! One running add-on process.
//!
//! A [`RunningProcess`] owns the launcher, the primary channel and every
//! secondary channel the add-on opened for its worker threads. It tracks
//! which instance handles are attached, makes the add-on level create and
//! destroy calls when the first handle attaches and the last one leaves, and
//! holds the idle deadline the sweep checks.

use crate::addon::Addon;
use crate::api::addon_base::{Create, Destroy};
use crate::api::main::{CreateForNewThread, DestroyForThread, NewThread};
use crate::api::{self, ApiFunction};
use crate::arena::InstanceToken;
use crate::callbacks::HostCall;
use crate::channel::{InboundDispatch, RunningThread};
use crate::controller::Shared;
use crate::entry::{AddonEntry, HostLink};
use crate::error::{InterfaceError, LaunchStage, Result};
use crate::instance::InstanceCore;
use crate::launcher::{is_shared_library, ChildStatus, LaunchCommand, LaunchOutcome, Launcher};
use crate::protocol::{
    endpoint_path, AddonStatus, Frame, FuncGroup, InstanceInfo, PRIMARY_THREAD_ID,
};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Handshake poll interval of background launches.
const HANDSHAKE_POLL: Duration = Duration::from_millis(100);
const EXIT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
enum LaunchState {
    Pending,
    Ready,
    Failed(String),
}

struct EndTime {
    timeout: Option<Duration>,
    deadline: Instant,
}

/// Snapshot of one process for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub addon_id: String,
    pub uuid: String,
    pub pid: Option<u32>,
    pub sandboxed: bool,
    pub status: ChildStatus,
    pub instances: usize,
    pub threads: usize,
    pub uptime: Duration,
}

pub struct RunningProcess {
    addon: Arc<Addon>,
    uuid: String,
    sandboxed: bool,
    shared: Arc<Shared>,
    self_ref: Weak<RunningProcess>,
    launcher: Mutex<Box<dyn Launcher>>,
    primary: RwLock<Option<Arc<RunningThread>>>,
    sub_threads: Mutex<HashMap<u64, Arc<RunningThread>>>,
    next_thread_id: AtomicU64,
    instances: Mutex<HashMap<InstanceToken, Weak<InstanceCore>>>,
    /// Serialises attach and detach so the add-on sees create before use.
    lifecycle: Mutex<()>,
    attaching: AtomicUsize,
    end_time: Mutex<EndTime>,
    launch_state: Mutex<LaunchState>,
    launched: Condvar,
    killed: AtomicBool,
    started_at: Instant,
}

impl RunningProcess {
    pub(crate) fn new(addon: Arc<Addon>, shared: Arc<Shared>) -> Arc<Self> {
        let info = addon.info();
        let sandboxed = !(shared.config.no_sandbox || is_shared_library(&info.binary_path));
        let launcher = (shared.launchers)(info, sandboxed);
        let uuid = format!("kodi-subproc-{}", Uuid::new_v4());

        Arc::new_cyclic(|self_ref| Self {
            addon,
            uuid,
            sandboxed,
            shared,
            self_ref: self_ref.clone(),
            launcher: Mutex::new(launcher),
            primary: RwLock::new(None),
            sub_threads: Mutex::new(HashMap::new()),
            next_thread_id: AtomicU64::new(PRIMARY_THREAD_ID + 1),
            instances: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(()),
            attaching: AtomicUsize::new(0),
            end_time: Mutex::new(EndTime {
                timeout: None,
                deadline: Instant::now(),
            }),
            launch_state: Mutex::new(LaunchState::Pending),
            launched: Condvar::new(),
            killed: AtomicBool::new(false),
            started_at: Instant::now(),
        })
    }

    pub fn addon(&self) -> &Arc<Addon> {
        &self.addon
    }

    pub fn addon_id(&self) -> &str {
        self.addon.id()
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn is_sandboxed(&self) -> bool {
        self.sandboxed
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    fn launch_failed(&self, stage: LaunchStage, reason: impl Into<String>) -> InterfaceError {
        InterfaceError::LaunchFailed {
            addon_id: self.addon_id().to_string(),
            stage,
            reason: reason.into(),
        }
    }

    /// Starts the add-on. Returns once it is reachable, or once it exited
    /// when `wait_for_exit` is set.
    pub fn launch(&self, extra_args: &[String], wait_for_exit: bool) -> Result<()> {
        let info = self.addon.info();
        if !info.binary_path.exists() {
            let err = self.launch_failed(
                LaunchStage::Resolve,
                format!("{} does not exist", info.binary_path.display()),
            );
            self.finish_launch(Some(&err));
            return Err(err);
        }

        let config = &self.shared.config;
        let mut command = LaunchCommand::new(
            config.launcher_exe.clone(),
            info.binary_path.clone(),
            self.uuid.clone(),
        );
        command.devkit_lib = config.devkit_lib.clone();
        command.devkit_dir = config.devkit_dir.clone();
        command.report_path = config.report_path.clone();
        command.rendezvous_dir = config.rendezvous_dir.clone();
        command.debug = config.debug;
        command.extra_args = extra_args.to_vec();

        if self.sandboxed {
            let endpoint = endpoint_path(&config.rendezvous_dir, &self.uuid, PRIMARY_THREAD_ID);
            let channel = RunningThread::listen(
                PRIMARY_THREAD_ID,
                &self.uuid,
                &endpoint,
                self.dispatcher(),
                config.connect_timeout(),
            )
            .map_err(|e| self.launch_failed(LaunchStage::Rendezvous, e.to_string()));
            match channel {
                Ok(channel) => *self.primary.write() = Some(Arc::new(channel)),
                Err(err) => {
                    self.finish_launch(Some(&err));
                    return Err(err);
                }
            }
        } else {
            command.direct_api = Some(format!("{:p}", self));
        }

        let inline = wait_for_exit || self.launcher.lock().supports_non_blocking(&info.binary_path);
        if inline {
            let result = self.start_now(&command);
            self.finish_launch(result.as_ref().err());
            if result? && wait_for_exit {
                self.wait_for_child_exit();
            }
            return Ok(());
        }

        let process = self
            .self_ref
            .upgrade()
            .ok_or_else(|| self.launch_failed(LaunchStage::Spawn, "process dropped"))?;
        thread::Builder::new()
            .name(format!("addon-launch-{}", self.addon_id()))
            .spawn(move || {
                let result = process
                    .start_now(&command)
                    .and_then(|_| process.wait_for_handshake());
                process.finish_launch(result.as_ref().err());
            })?;
        self.wait_until_launched()
    }

    /// Returns true when a child process was spawned.
    fn start_now(&self, command: &LaunchCommand) -> Result<bool> {
        let outcome = self.launcher.lock().launch(command)?;
        match outcome {
            LaunchOutcome::Spawned { pid } => {
                tracing::debug!(addon = self.addon_id(), uuid = %self.uuid, pid, "add-on process started");
                Ok(true)
            }
            LaunchOutcome::Direct(entry) => {
                *self.primary.write() = Some(Arc::new(RunningThread::direct(
                    format!("{}-{PRIMARY_THREAD_ID}", self.uuid),
                    Arc::clone(&entry),
                )));
                let link: Arc<dyn HostLink> = Arc::new(DirectHostLink {
                    process: self.self_ref.clone(),
                    thread_id: PRIMARY_THREAD_ID,
                });
                let status = entry.start(&command.addon_args(), link);
                if !status.is_ok() {
                    return Err(self.launch_failed(LaunchStage::Create, status.to_string()));
                }
                tracing::debug!(addon = self.addon_id(), uuid = %self.uuid, "add-on started in-process");
                Ok(false)
            }
        }
    }

    /// The launcher lock is only taken per poll, so liveness queries and
    /// `kill` stay responsive while a helper runs.
    fn wait_for_child_exit(&self) {
        while !self.is_killed() && self.launcher.lock().process_active() == ChildStatus::Running {
            thread::sleep(EXIT_POLL);
        }
        tracing::debug!(addon = self.addon_id(), uuid = %self.uuid, "add-on process exited");
    }

    fn wait_for_handshake(&self) -> Result<()> {
        let deadline = Instant::now() + self.shared.config.start_timeout();
        loop {
            let channel = self.primary_channel()?;
            if channel.is_connected() {
                return Ok(());
            }
            if channel.is_closed() {
                return Err(self.launch_failed(
                    LaunchStage::Handshake,
                    "channel closed before the add-on connected",
                ));
            }
            let status = self.launcher.lock().process_active();
            if status != ChildStatus::Running {
                return Err(self.launch_failed(
                    LaunchStage::Handshake,
                    format!("add-on {status} during startup"),
                ));
            }
            if Instant::now() >= deadline {
                return Err(self.launch_failed(LaunchStage::Handshake, "no handshake in time"));
            }
            thread::sleep(HANDSHAKE_POLL);
        }
    }

    fn finish_launch(&self, error: Option<&InterfaceError>) {
        let mut state = self.launch_state.lock();
        if *state != LaunchState::Pending {
            return;
        }
        *state = match error {
            None => LaunchState::Ready,
            Some(err) => LaunchState::Failed(err.to_string()),
        };
        self.launched.notify_all();
    }

    /// Blocks until the launch finished, successfully or not.
    pub fn wait_until_launched(&self) -> Result<()> {
        let mut state = self.launch_state.lock();
        loop {
            match &*state {
                LaunchState::Pending => self.launched.wait(&mut state),
                LaunchState::Ready => return Ok(()),
                LaunchState::Failed(reason) => {
                    return Err(self.launch_failed(LaunchStage::Handshake, reason.clone()))
                }
            }
        }
    }

    pub fn is_launch_pending(&self) -> bool {
        *self.launch_state.lock() == LaunchState::Pending
    }

    /// Asks the add-on to stop, terminates it and tears down every channel.
    /// Returns false if it was not running anymore.
    pub fn kill(&self) -> bool {
        if self.killed.swap(true, Ordering::SeqCst) {
            return false;
        }
        tracing::debug!(addon = self.addon_id(), uuid = %self.uuid, "stopping add-on process");

        let running = self.launcher.lock().process_active() == ChildStatus::Running;
        let primary = self.primary.read().clone();
        if running {
            if let Some(primary) = primary {
                if primary.is_connected() && !primary.is_closed() && !primary.is_suspect() {
                    if let Err(e) = primary.request_stop(&self.uuid, self.shared.config.kill_timeout())
                    {
                        tracing::debug!(addon = self.addon_id(), "kill request not acknowledged: {e}");
                    }
                }
            }
        }

        let killed = self.launcher.lock().kill(true);

        let secondary: Vec<_> = self.sub_threads.lock().drain().map(|(_, c)| c).collect();
        for channel in secondary {
            channel.destroy();
        }
        let primary = self.primary.write().take();
        if let Some(primary) = primary {
            primary.destroy();
        }

        let err = self.launch_failed(LaunchStage::Handshake, "process killed");
        self.finish_launch(Some(&err));
        killed
    }

    /// Liveness as the sweep sees it: a suspect channel counts as dead.
    pub fn process_active(&self) -> ChildStatus {
        let status = self.launcher.lock().process_active();
        if status == ChildStatus::Running && self.has_suspect_channel() {
            return ChildStatus::Unresponsive;
        }
        status
    }

    fn has_suspect_channel(&self) -> bool {
        if self
            .primary
            .read()
            .as_ref()
            .is_some_and(|channel| channel.is_suspect())
        {
            return true;
        }
        self.sub_threads
            .lock()
            .values()
            .any(|channel| channel.is_suspect())
    }

    pub fn stack_trace(&self) -> String {
        self.launcher.lock().stack_trace()
    }

    pub fn main_pid(&self) -> Option<u32> {
        self.launcher.lock().main_pid()
    }

    pub(crate) fn begin_attach(&self) {
        self.attaching.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn end_attach(&self) {
        self.attaching.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn is_attaching(&self) -> bool {
        self.attaching.load(Ordering::SeqCst) > 0
    }

    /// Attaches an instance handle. The first one creates the add-on.
    pub(crate) fn add_instance(&self, core: &Arc<InstanceCore>, first: &InstanceInfo) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        if self.is_killed() {
            return Err(InterfaceError::ChannelClosed(self.uuid.clone()));
        }

        let was_empty = {
            let mut instances = self.instances.lock();
            let was_empty = instances.is_empty();
            instances.insert(core.token(), Arc::downgrade(core));
            was_empty
        };
        if !was_empty {
            return Ok(());
        }

        let status = self.call::<Create>(first).unwrap_or_else(|e| {
            tracing::error!(addon = self.addon_id(), "add-on create call failed: {e}");
            AddonStatus::LostConnection
        });
        if !status.is_ok() {
            self.instances.lock().remove(&core.token());
            return Err(self.launch_failed(LaunchStage::Create, status.to_string()));
        }
        Ok(())
    }

    /// Detaches an instance handle and returns how many remain. The last one
    /// destroys the add-on.
    pub(crate) fn release_instance(&self, token: InstanceToken) -> usize {
        let _lifecycle = self.lifecycle.lock();
        let remaining = {
            let mut instances = self.instances.lock();
            if instances.remove(&token).is_none() {
                return instances.len();
            }
            instances.len()
        };

        if remaining == 0 && !self.is_killed() && self.process_active() == ChildStatus::Running {
            if let Err(e) = self.call::<Destroy>(&()) {
                tracing::warn!(addon = self.addon_id(), "add-on destroy call failed: {e}");
            }
        }
        remaining
    }

    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn thread_count(&self) -> usize {
        self.sub_threads.lock().len()
    }

    /// Tells every attached handle that the process is gone.
    pub fn inform_stop_report(&self, status: ChildStatus) {
        let handles: Vec<Arc<InstanceCore>> = self
            .instances
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        for handle in handles {
            handle.on_stop_report(status);
        }
    }

    fn primary_channel(&self) -> Result<Arc<RunningThread>> {
        self.primary
            .read()
            .clone()
            .ok_or_else(|| InterfaceError::ChannelClosed(self.uuid.clone()))
    }

    fn dispatcher(&self) -> Arc<dyn InboundDispatch> {
        Arc::new(ProcessDispatch(self.self_ref.clone()))
    }

    /// Fire-and-forget call on the primary channel.
    pub fn send<F: ApiFunction>(&self, input: &F::Input) -> Result<()> {
        self.primary_channel()?.send(api::frame::<F>(input)?)
    }

    /// Call without a result that still waits for the add-on to finish it.
    pub fn send_with_input<F: ApiFunction<Output = ()>>(&self, input: &F::Input) -> Result<()> {
        self.call::<F>(input)
    }

    pub fn call<F: ApiFunction>(&self, input: &F::Input) -> Result<F::Output> {
        let channel = self.primary_channel()?;
        let payload = channel.call(api::frame::<F>(input)?, self.shared.config.call_timeout())?;
        api::decode(&payload)
    }

    /// Handles a call from add-on thread `thread_id`.
    pub fn func_call(&self, thread_id: u64, frame: &Frame) -> Result<Vec<u8>> {
        if frame.group == FuncGroup::Main {
            return match frame.func {
                CreateForNewThread::ID => {
                    let caller: u64 = api::decode(&frame.payload)?;
                    api::encode(&self.create_thread_channel(thread_id, caller)?)
                }
                DestroyForThread::ID => {
                    let target: u64 = api::decode(&frame.payload)?;
                    self.destroy_thread_channel(thread_id, target)?;
                    api::encode(&())
                }
                _ => Err(api::unknown_function(frame)),
            };
        }

        let process = self
            .self_ref
            .upgrade()
            .ok_or_else(|| InterfaceError::ChannelClosed(self.uuid.clone()))?;
        self.shared
            .handlers
            .dispatch(&HostCall { process, thread_id }, frame)
    }

    fn create_thread_channel(&self, caller_channel: u64, caller: u64) -> Result<NewThread> {
        if caller_channel != PRIMARY_THREAD_ID || caller != caller_channel {
            return Err(InterfaceError::InvalidThread(caller));
        }

        let thread_id = self.next_thread_id.fetch_add(1, Ordering::SeqCst);
        let (channel, endpoint) = if self.sandboxed {
            let config = &self.shared.config;
            let endpoint = endpoint_path(&config.rendezvous_dir, &self.uuid, thread_id);
            let channel = RunningThread::listen(
                thread_id,
                &self.uuid,
                &endpoint,
                self.dispatcher(),
                config.connect_timeout(),
            )?;
            (channel, Some(endpoint.to_string_lossy().into_owned()))
        } else {
            let entry: Arc<dyn AddonEntry> = self
                .primary_channel()?
                .direct_entry()
                .ok_or_else(|| InterfaceError::Protocol("direct process without entry".into()))?;
            let label = format!("{}-{thread_id}", self.uuid);
            (RunningThread::direct(label, entry), None)
        };

        self.sub_threads.lock().insert(thread_id, Arc::new(channel));
        tracing::debug!(addon = self.addon_id(), thread_id, "secondary channel opened");
        Ok(NewThread {
            thread_id,
            endpoint,
        })
    }

    fn destroy_thread_channel(&self, caller_channel: u64, target: u64) -> Result<()> {
        if target == PRIMARY_THREAD_ID
            || (caller_channel != PRIMARY_THREAD_ID && caller_channel != target)
        {
            return Err(InterfaceError::InvalidThread(caller_channel));
        }
        let channel = self
            .sub_threads
            .lock()
            .remove(&target)
            .ok_or(InterfaceError::InvalidThread(target))?;
        channel.destroy();
        Ok(())
    }

    /// Sets the idle timeout and restarts the deadline.
    pub fn set_end_time(&self, timeout: Option<Duration>) {
        let mut end_time = self.end_time.lock();
        end_time.timeout = timeout;
        end_time.deadline = Instant::now() + timeout.unwrap_or_default();
    }

    pub fn uses_end_time(&self) -> bool {
        self.end_time.lock().timeout.is_some()
    }

    /// Zero once the idle deadline passed; `Duration::MAX` without a timeout.
    pub fn end_time_left(&self) -> Duration {
        let end_time = self.end_time.lock();
        match end_time.timeout {
            Some(_) => end_time.deadline.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }

    /// Whether any instance is attached. Being in use renews the idle lease.
    pub fn poll_and_renew(&self) -> bool {
        let in_use = self.instance_count() > 0 || self.is_attaching();
        if in_use {
            let mut end_time = self.end_time.lock();
            end_time.deadline = Instant::now() + end_time.timeout.unwrap_or_default();
        }
        in_use
    }

    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            addon_id: self.addon_id().to_string(),
            uuid: self.uuid.clone(),
            pid: self.main_pid(),
            sandboxed: self.sandboxed,
            status: self.process_active(),
            instances: self.instance_count(),
            threads: self.thread_count(),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if !self.is_killed() {
            self.kill();
        }
    }
}

/// Routes socket channel calls to the process without keeping it alive.
struct ProcessDispatch(Weak<RunningProcess>);

impl InboundDispatch for ProcessDispatch {
    fn dispatch(&self, thread_id: u64, frame: &Frame) -> Result<Vec<u8>> {
        let process = self
            .0
            .upgrade()
            .ok_or_else(|| InterfaceError::ChannelClosed("process gone".into()))?;
        process.func_call(thread_id, frame)
    }
}

/// Host link handed to in-process add-ons.
struct DirectHostLink {
    process: Weak<RunningProcess>,
    thread_id: u64,
}

impl DirectHostLink {
    fn process(&self) -> Result<Arc<RunningProcess>> {
        self.process
            .upgrade()
            .ok_or_else(|| InterfaceError::ChannelClosed("process gone".into()))
    }
}

impl HostLink for DirectHostLink {
    fn thread_id(&self) -> u64 {
        self.thread_id
    }

    fn call(&self, frame: Frame) -> Result<Vec<u8>> {
        self.process()?.func_call(self.thread_id, &frame)
    }

    fn create_thread_link(&self) -> Result<Arc<dyn HostLink>> {
        let frame = api::frame::<CreateForNewThread>(&self.thread_id)?;
        let reply = self.process()?.func_call(self.thread_id, &frame)?;
        let thread: NewThread = api::decode(&reply)?;
        Ok(Arc::new(DirectHostLink {
            process: self.process.clone(),
            thread_id: thread.thread_id,
        }))
    }

    fn release(&self) -> Result<()> {
        let frame = api::frame::<DestroyForThread>(&self.thread_id)?;
        self.process()?.func_call(self.thread_id, &frame).map(|_| ())
    }
}
