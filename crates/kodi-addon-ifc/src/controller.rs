//! Registry of running add-on processes.
//!
//! The [`Controller`] hands out at most one [`RunningProcess`] per add-on id,
//! launching it on first demand. A sweep thread checks every process at a
//! fixed interval: crashed or unresponsive ones are removed, their instance
//! handles told, and a crash report queued; idle ones past their deadline
//! are stopped.

use crate::addon::{Addon, AddonInfo};
use crate::arena::{Arena, InstanceToken};
use crate::callbacks::{host_handlers, HostCall};
use crate::catalog::AddonCatalog;
use crate::config::ControllerConfig;
use crate::crash::{CrashReport, CrashReportQueue, CrashReporter, IgnoreCrashes};
use crate::dialog::SettingsDialogs;
use crate::dispatch::HandlerTable;
use crate::error::{InterfaceError, Result};
use crate::instance::InstanceCore;
use crate::launcher::{default_launcher_factory, ChildStatus, DirectRegistry, LauncherFactory};
use crate::process::{ProcessInfo, RunningProcess};
use crate::protocol::InstanceInfo;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

/// State shared by the controller, its processes and instance handles.
pub(crate) struct Shared {
    pub(crate) config: ControllerConfig,
    pub(crate) catalog: Arc<dyn AddonCatalog>,
    pub(crate) arena: Arena<InstanceCore>,
    pub(crate) dialogs: Arc<SettingsDialogs>,
    pub(crate) handlers: HandlerTable<HostCall>,
    pub(crate) launchers: LauncherFactory,
    /// Held around every instance create call.
    pub(crate) create_lock: Mutex<()>,
    system_stopping: AtomicBool,
}

pub struct ControllerBuilder {
    config: ControllerConfig,
    catalog: Arc<dyn AddonCatalog>,
    dialogs: Option<Arc<SettingsDialogs>>,
    reporter: Option<Arc<dyn CrashReporter>>,
    launchers: Option<LauncherFactory>,
    registry: DirectRegistry,
}

impl ControllerBuilder {
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dialogs(mut self, dialogs: Arc<SettingsDialogs>) -> Self {
        self.dialogs = Some(dialogs);
        self
    }

    pub fn crash_reporter(mut self, reporter: Arc<dyn CrashReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Replaces the launchers, e.g. with test doubles.
    pub fn launcher_factory(mut self, launchers: LauncherFactory) -> Self {
        self.launchers = Some(launchers);
        self
    }

    /// Add-ons linked into the host, used by the default launcher factory.
    pub fn direct_registry(mut self, registry: DirectRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Builds the controller. Call [`Controller::start`] to begin sweeping.
    pub fn build(self) -> Result<Controller> {
        let reporter = self.reporter.unwrap_or_else(|| Arc::new(IgnoreCrashes));
        let crash_reports = CrashReportQueue::start(reporter, Arc::clone(&self.catalog))?;
        let shared = Shared {
            config: self.config,
            catalog: self.catalog,
            arena: Arena::new(),
            dialogs: self.dialogs.unwrap_or_default(),
            handlers: host_handlers(),
            launchers: self
                .launchers
                .unwrap_or_else(|| default_launcher_factory(self.registry)),
            create_lock: Mutex::new(()),
            system_stopping: AtomicBool::new(false),
        };

        Ok(Controller {
            inner: Arc::new(ControllerInner {
                shared: Arc::new(shared),
                processes: Mutex::new(HashMap::new()),
                crash_reports,
                sweep: Mutex::new(None),
            }),
        })
    }
}

struct SweepThread {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

struct ControllerInner {
    shared: Arc<Shared>,
    processes: Mutex<HashMap<String, Arc<RunningProcess>>>,
    crash_reports: CrashReportQueue,
    sweep: Mutex<Option<SweepThread>>,
}

/// Cheap to clone; every clone drives the same set of processes.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl Controller {
    pub fn builder(catalog: Arc<dyn AddonCatalog>) -> ControllerBuilder {
        ControllerBuilder {
            config: ControllerConfig::default(),
            catalog,
            dialogs: None,
            reporter: None,
            launchers: None,
            registry: DirectRegistry::new(),
        }
    }

    pub fn new(config: ControllerConfig, catalog: Arc<dyn AddonCatalog>) -> Result<Self> {
        Self::builder(catalog).config(config).build()
    }

    /// Checks the devkit and starts the sweep thread.
    pub fn start(&self) -> Result<()> {
        self.inner.shared.config.validate_devkit()?;

        let mut sweep = self.inner.sweep.lock();
        if sweep.is_some() {
            return Ok(());
        }

        let (stop, stopped) = bounded::<()>(1);
        let interval = self.inner.shared.config.sweep_interval();
        let inner: Weak<ControllerInner> = Arc::downgrade(&self.inner);
        let handle = thread::Builder::new()
            .name("addon-sweep".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(inner) = inner.upgrade() else {
                            break;
                        };
                        inner.sweep();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        *sweep = Some(SweepThread { stop, handle });
        tracing::debug!(?interval, "add-on sweep started");
        Ok(())
    }

    /// Stops the sweep and kills every remaining process.
    pub fn stop(&self) {
        self.inner.shutdown();
    }

    /// Suppresses crash reports while the host is going down.
    pub fn begin_system_stop(&self) {
        self.inner
            .shared
            .system_stopping
            .store(true, Ordering::SeqCst);
    }

    pub fn is_system_stopping(&self) -> bool {
        self.inner.shared.system_stopping.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.shared.config
    }

    pub fn catalog(&self) -> &Arc<dyn AddonCatalog> {
        &self.inner.shared.catalog
    }

    pub fn dialogs(&self) -> &Arc<SettingsDialogs> {
        &self.inner.shared.dialogs
    }

    /// Instance handles currently alive.
    pub fn live_instances(&self) -> usize {
        self.inner.shared.arena.len()
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    pub fn running_process(&self, addon_id: &str) -> Option<Arc<RunningProcess>> {
        self.inner.processes.lock().get(addon_id).cloned()
    }

    pub fn running_addon(&self, addon_id: &str) -> Option<Arc<Addon>> {
        self.running_process(addon_id)
            .map(|process| Arc::clone(process.addon()))
    }

    pub fn process_info(&self) -> Vec<ProcessInfo> {
        let processes: Vec<_> = self.inner.processes.lock().values().cloned().collect();
        let mut info: Vec<_> = processes.iter().map(|process| process.info()).collect();
        info.sort_by(|a, b| a.addon_id.cmp(&b.addon_id));
        info
    }

    fn check_enabled(&self, addon_id: &str) -> Result<()> {
        if self.inner.shared.catalog.is_disabled(addon_id) {
            return Err(InterfaceError::AddonDisabled(addon_id.to_string()));
        }
        Ok(())
    }

    /// Returns the add-on's process with `instance` attached, launching it
    /// if no process runs yet.
    pub(crate) fn acquire_process(
        &self,
        info: &Arc<AddonInfo>,
        instance: &Arc<InstanceCore>,
        first_instance: &InstanceInfo,
    ) -> Result<Arc<RunningProcess>> {
        self.check_enabled(&info.id)?;

        let (process, launch) = {
            let mut processes = self.inner.processes.lock();
            let (process, launch) = match processes.get(&info.id) {
                Some(process) => (Arc::clone(process), false),
                None => {
                    let addon = Arc::new(Addon::new(Arc::clone(info), info.main_type()));
                    let process = RunningProcess::new(addon, Arc::clone(&self.inner.shared));
                    processes.insert(info.id.clone(), Arc::clone(&process));
                    (process, true)
                }
            };
            // Still under the map lock, so the sweep cannot reap it before
            // the instance is attached.
            process.begin_attach();
            (process, launch)
        };

        let result = self.attach(&process, launch, instance, first_instance);
        process.end_attach();
        result.map(|()| process)
    }

    fn attach(
        &self,
        process: &Arc<RunningProcess>,
        launch: bool,
        instance: &Arc<InstanceCore>,
        first_instance: &InstanceInfo,
    ) -> Result<()> {
        if launch {
            if let Err(e) = process.launch(&[], false) {
                tracing::error!(
                    addon = process.addon_id(),
                    "failed to start add-on process, fatal for this feature: {e}"
                );
                self.remove(process);
                process.kill();
                return Err(e);
            }
        } else {
            process.wait_until_launched()?;
        }

        process.set_end_time(self.inner.shared.config.idle_timeout());
        process.add_instance(instance, first_instance)
    }

    /// Detaches `instance`; without an idle timeout the last detach stops
    /// the process.
    pub(crate) fn release_process(&self, process: &Arc<RunningProcess>, instance: InstanceToken) {
        let remaining = process.release_instance(instance);
        if remaining > 0 || process.uses_end_time() {
            return;
        }

        let removed = {
            let mut processes = self.inner.processes.lock();
            let idle = process.instance_count() == 0 && !process.is_attaching();
            if idle && Self::is_current(&processes, process) {
                processes.remove(process.addon_id())
            } else {
                None
            }
        };
        if let Some(process) = removed {
            process.kill();
        }
    }

    /// Runs an add-on without instances, e.g. a helper executable. With
    /// `wait_for_exit` the call returns after the add-on exited.
    pub fn launch_addon(
        &self,
        info: &Arc<AddonInfo>,
        args: &[String],
        wait_for_exit: bool,
    ) -> Result<Arc<RunningProcess>> {
        self.check_enabled(&info.id)?;

        let process = {
            let mut processes = self.inner.processes.lock();
            if let Some(existing) = processes.get(&info.id) {
                tracing::debug!(addon = %info.id, "add-on already running");
                return Ok(Arc::clone(existing));
            }
            let addon = Arc::new(Addon::new(Arc::clone(info), info.main_type()));
            let process = RunningProcess::new(addon, Arc::clone(&self.inner.shared));
            processes.insert(info.id.clone(), Arc::clone(&process));
            process
        };

        let result = process.launch(args, wait_for_exit);
        if result.is_err() || wait_for_exit {
            self.remove(&process);
            process.kill();
        }
        result.map(|()| process)
    }

    fn remove(&self, process: &Arc<RunningProcess>) {
        let mut processes = self.inner.processes.lock();
        if Self::is_current(&processes, process) {
            processes.remove(process.addon_id());
        }
    }

    fn is_current(
        processes: &HashMap<String, Arc<RunningProcess>>,
        process: &Arc<RunningProcess>,
    ) -> bool {
        processes
            .get(process.addon_id())
            .is_some_and(|current| Arc::ptr_eq(current, process))
    }
}

impl ControllerInner {
    fn sweep(&self) {
        let mut crashed = Vec::new();
        let mut finished = Vec::new();
        let mut idle = Vec::new();
        {
            let mut processes = self.processes.lock();
            processes.retain(|_, process| {
                if process.is_launch_pending() {
                    return true;
                }
                let status = process.process_active();
                if status != ChildStatus::Running {
                    if status == ChildStatus::ExitedNormally
                        && process.instance_count() == 0
                        && !process.is_attaching()
                    {
                        finished.push(Arc::clone(process));
                    } else {
                        crashed.push((Arc::clone(process), status));
                    }
                    return false;
                }
                if process.uses_end_time()
                    && !process.poll_and_renew()
                    && process.end_time_left().is_zero()
                {
                    idle.push(Arc::clone(process));
                    return false;
                }
                true
            });
        }

        for (process, status) in crashed {
            self.handle_crash(&process, status);
        }
        for process in finished {
            tracing::debug!(addon = process.addon_id(), "add-on exited");
            process.kill();
        }
        for process in idle {
            tracing::debug!(addon = process.addon_id(), "stopping idle add-on");
            process.kill();
        }
    }

    fn handle_crash(&self, process: &RunningProcess, status: ChildStatus) {
        tracing::error!(
            addon = process.addon_id(),
            uuid = process.uuid(),
            %status,
            "add-on process stopped uncontrolled"
        );
        let stacktrace = process.stack_trace();
        process.inform_stop_report(status);
        process.kill();

        if self.shared.system_stopping.load(Ordering::SeqCst) {
            return;
        }
        let info = process.addon().info();
        self.crash_reports.post(CrashReport {
            addon_id: info.id.clone(),
            uuid: process.uuid().to_string(),
            status,
            stacktrace,
            report_path: self.shared.config.report_path.clone(),
            language: info.language,
        });
    }

    fn shutdown(&self) {
        self.shared.system_stopping.store(true, Ordering::SeqCst);

        if let Some(sweep) = self.sweep.lock().take() {
            drop(sweep.stop);
            if sweep.handle.thread().id() != thread::current().id() && sweep.handle.join().is_err()
            {
                tracing::error!("add-on sweep thread panicked");
            }
        }

        let processes: Vec<_> = self.processes.lock().drain().map(|(_, p)| p).collect();
        for process in processes {
            process.kill();
        }
        self.crash_reports.stop();
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
