//! Test helpers and fixtures for kodi-addons integration tests
//!
//! ## Launchers
//!
//! - [`MockLaunchers`]: hands out in-process entries and lets tests fake a
//!   crash by flipping the reported child status.
//! - [`SocketLauncher`]: serves the entry from a thread through
//!   [`AddonServer`], so every call crosses a real unix socket.
//!
//! Both count launches and kills per add-on so tests can check that a
//! process was started exactly once.

#![allow(dead_code)]

use kodi_addons::ifc::launcher::LaunchOutcome;
use kodi_addons::ifc::{LaunchCommand, Launcher, LogLevel};
use kodi_addons::prelude::*;
use kodi_addons::{AddonServer, LauncherFactory};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const SCREENSAVER: &str = "screensaver.test";
pub const VISUALIZATION: &str = "visualization.test";
pub const EXECUTABLE: &str = "executable.test";

/// Default speed setting of every test add-on.
pub const DEFAULT_SPEED: i32 = 3;

/// Sweep interval short enough for tests to wait on.
pub const TEST_SWEEP_MS: u64 = 20;

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Generous bound for anything the sweep has to notice.
pub fn sweep_deadline() -> Duration {
    Duration::from_secs(3)
}

// =============================================================================
// Test add-on
// =============================================================================

/// What the test add-on saw. Shared between every entry a launcher creates.
#[derive(Default)]
pub struct AddonTally {
    pub creates: AtomicUsize,
    pub destroys: AtomicUsize,
    pub instances_created: AtomicUsize,
    pub instances_destroyed: AtomicUsize,
    pub stops: AtomicUsize,
    pub workers: AtomicUsize,
    pub speeds: Mutex<Vec<i32>>,
    /// Sleep this long inside instance creation.
    pub create_delay: Option<Duration>,
    /// Sleep this long when asked to stop.
    pub stop_delay: Option<Duration>,
    /// Open, use and release a worker thread channel inside instance creation.
    pub open_worker: bool,
    /// Mock launches spawn a fake child that exits by itself after this long.
    pub helper_runtime: Option<Duration>,
}

impl AddonTally {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Screensaver-like add-on that needs a positive `speed` setting.
pub struct TestAddon {
    tally: Arc<AddonTally>,
}

impl TestAddon {
    pub fn entry(tally: &Arc<AddonTally>) -> Arc<dyn AddonEntry> {
        Arc::new(AddonBaseEntry::new(TestAddon {
            tally: Arc::clone(tally),
        }))
    }
}

impl AddonBase for TestAddon {
    fn create(&self, _host: &HostApi, _first_instance: &InstanceInfo) -> AddonStatus {
        self.tally.creates.fetch_add(1, Ordering::SeqCst);
        AddonStatus::Ok
    }

    fn destroy(&self) {
        self.tally.destroys.fetch_add(1, Ordering::SeqCst);
    }

    fn create_instance(
        &self,
        host: &HostApi,
        info: &InstanceInfo,
    ) -> std::result::Result<u64, AddonStatus> {
        if let Some(delay) = self.tally.create_delay {
            thread::sleep(delay);
        }

        let speed = host
            .setting_int(info.backend, "speed")
            .map_err(|_| AddonStatus::Unknown)?
            .ok_or(AddonStatus::NeedSettings)?;
        if speed <= 0 {
            return Err(AddonStatus::NeedSettings);
        }

        if self.tally.open_worker {
            let worker = host.for_new_thread().map_err(|_| AddonStatus::Unknown)?;
            worker
                .log(LogLevel::Info, "worker thread up")
                .map_err(|_| AddonStatus::Unknown)?;
            self.tally.workers.fetch_add(1, Ordering::SeqCst);
            worker.release_thread().map_err(|_| AddonStatus::Unknown)?;
        }

        self.tally.speeds.lock().push(speed);
        Ok(self.tally.instances_created.fetch_add(1, Ordering::SeqCst) as u64 + 1)
    }

    fn destroy_instance(&self, _info: &InstanceInfo, _instance: u64) {
        self.tally.instances_destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        if let Some(delay) = self.tally.stop_delay {
            thread::sleep(delay);
        }
        self.tally.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Mock launcher
// =============================================================================

/// Liveness and counters of one mocked process.
pub struct MockControl {
    status: Mutex<ChildStatus>,
    pub launches: AtomicUsize,
    pub kills: AtomicUsize,
    stacktrace: Mutex<String>,
}

impl MockControl {
    fn new() -> Self {
        Self {
            status: Mutex::new(ChildStatus::NotStarted),
            launches: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
            stacktrace: Mutex::new(String::new()),
        }
    }

    /// Make the next liveness check report `status`.
    pub fn crash(&self, status: ChildStatus, stacktrace: &str) {
        *self.stacktrace.lock() = stacktrace.to_string();
        *self.status.lock() = status;
    }

    pub fn status(&self) -> ChildStatus {
        *self.status.lock()
    }
}

struct MockLauncher {
    tally: Arc<AddonTally>,
    control: Arc<MockControl>,
    exits_at: Option<Instant>,
}

impl Launcher for MockLauncher {
    fn launch(&mut self, _command: &LaunchCommand) -> kodi_addons::ifc::Result<LaunchOutcome> {
        self.control.launches.fetch_add(1, Ordering::SeqCst);
        *self.control.status.lock() = ChildStatus::Running;
        if let Some(runtime) = self.tally.helper_runtime {
            self.exits_at = Some(Instant::now() + runtime);
            return Ok(LaunchOutcome::Spawned {
                pid: std::process::id(),
            });
        }
        Ok(LaunchOutcome::Direct(TestAddon::entry(&self.tally)))
    }

    fn supports_non_blocking(&self, _binary: &Path) -> bool {
        true
    }

    fn kill(&mut self, _wait: bool) -> bool {
        self.control.kills.fetch_add(1, Ordering::SeqCst);
        let mut status = self.control.status.lock();
        let was_running = *status == ChildStatus::Running;
        if was_running {
            *status = ChildStatus::ExitedNormally;
        }
        was_running
    }

    fn process_active(&mut self) -> ChildStatus {
        let mut status = self.control.status.lock();
        if *status == ChildStatus::Running && self.exits_at.is_some_and(|at| Instant::now() >= at) {
            *status = ChildStatus::ExitedNormally;
        }
        *status
    }

    fn stack_trace(&self) -> String {
        self.control.stacktrace.lock().clone()
    }

    fn main_pid(&self) -> Option<u32> {
        None
    }
}

/// Launcher factory that records one [`MockControl`] per process.
pub struct MockLaunchers {
    tally: Arc<AddonTally>,
    controls: Mutex<Vec<(String, Arc<MockControl>)>>,
}

impl MockLaunchers {
    pub fn new(tally: &Arc<AddonTally>) -> Arc<Self> {
        Arc::new(Self {
            tally: Arc::clone(tally),
            controls: Mutex::new(Vec::new()),
        })
    }

    pub fn factory(self: &Arc<Self>) -> LauncherFactory {
        let launchers = Arc::clone(self);
        Arc::new(move |info: &AddonInfo, _sandboxed: bool| -> Box<dyn Launcher> {
            let control = Arc::new(MockControl::new());
            launchers
                .controls
                .lock()
                .push((info.id.clone(), Arc::clone(&control)));
            Box::new(MockLauncher {
                tally: Arc::clone(&launchers.tally),
                control,
                exits_at: None,
            })
        })
    }

    /// Processes created for `addon_id` so far.
    pub fn processes(&self, addon_id: &str) -> usize {
        self.controls
            .lock()
            .iter()
            .filter(|(id, _)| id == addon_id)
            .count()
    }

    pub fn launches(&self, addon_id: &str) -> usize {
        self.sum(addon_id, |control| &control.launches)
    }

    pub fn kills(&self, addon_id: &str) -> usize {
        self.sum(addon_id, |control| &control.kills)
    }

    fn sum(&self, addon_id: &str, counter: impl Fn(&MockControl) -> &AtomicUsize) -> usize {
        self.controls
            .lock()
            .iter()
            .filter(|(id, _)| id == addon_id)
            .map(|(_, control)| counter(control).load(Ordering::SeqCst))
            .sum()
    }

    /// Control of the newest process of `addon_id`.
    pub fn last(&self, addon_id: &str) -> Option<Arc<MockControl>> {
        self.controls
            .lock()
            .iter()
            .rev()
            .find(|(id, _)| id == addon_id)
            .map(|(_, control)| Arc::clone(control))
    }
}

// =============================================================================
// Socket launcher
// =============================================================================

/// Runs [`AddonServer`] on a thread in place of a child process.
pub struct SocketLauncher {
    tally: Arc<AddonTally>,
    status: Arc<Mutex<ChildStatus>>,
    server: Option<JoinHandle<()>>,
    pub kills: Arc<AtomicUsize>,
}

impl SocketLauncher {
    pub fn factory(tally: &Arc<AddonTally>, kills: &Arc<AtomicUsize>) -> LauncherFactory {
        let tally = Arc::clone(tally);
        let kills = Arc::clone(kills);
        Arc::new(move |_info: &AddonInfo, sandboxed: bool| -> Box<dyn Launcher> {
            assert!(sandboxed, "socket launcher used for a direct launch");
            Box::new(SocketLauncher {
                tally: Arc::clone(&tally),
                status: Arc::new(Mutex::new(ChildStatus::NotStarted)),
                server: None,
                kills: Arc::clone(&kills),
            })
        })
    }
}

impl Launcher for SocketLauncher {
    fn launch(&mut self, command: &LaunchCommand) -> kodi_addons::ifc::Result<LaunchOutcome> {
        let mut argv = vec![command.binary.to_string_lossy().into_owned()];
        argv.extend(command.addon_args());
        let entry = TestAddon::entry(&self.tally);
        let rendezvous_dir = command.rendezvous_dir.clone();
        let status = Arc::clone(&self.status);

        *status.lock() = ChildStatus::Running;
        let handle = thread::Builder::new()
            .name(format!("fake-child-{}", command.uuid))
            .spawn(move || {
                let result = AddonServer::from_argv(argv, entry)
                    .and_then(|server| server.with_rendezvous_dir(rendezvous_dir).run());
                *status.lock() = match result {
                    Ok(()) => ChildStatus::ExitedNormally,
                    Err(e) => {
                        tracing::warn!("fake child failed: {e}");
                        ChildStatus::StoppedByUnknown
                    }
                };
            })?;

        self.server = Some(handle);
        Ok(LaunchOutcome::Spawned {
            pid: std::process::id(),
        })
    }

    fn supports_non_blocking(&self, _binary: &Path) -> bool {
        false
    }

    fn kill(&mut self, _wait: bool) -> bool {
        self.kills.fetch_add(1, Ordering::SeqCst);
        let mut status = self.status.lock();
        let was_running = *status == ChildStatus::Running;
        if was_running {
            // The serving thread ends once its socket is closed.
            *status = ChildStatus::StoppedBySignal;
        }
        was_running
    }

    fn process_active(&mut self) -> ChildStatus {
        *self.status.lock()
    }

    fn stack_trace(&self) -> String {
        String::new()
    }

    fn main_pid(&self) -> Option<u32> {
        self.server.as_ref().map(|_| std::process::id())
    }
}

// =============================================================================
// Crash reporter
// =============================================================================

/// Records reports and answers with a fixed choice.
pub struct RecordingReporter {
    choice: CrashReportChoice,
    pub reports: Mutex<Vec<CrashReport>>,
}

impl RecordingReporter {
    pub fn new(choice: CrashReportChoice) -> Arc<Self> {
        Arc::new(Self {
            choice,
            reports: Mutex::new(Vec::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }
}

impl CrashReporter for RecordingReporter {
    fn ask(&self, report: &CrashReport) -> CrashReportChoice {
        self.reports.lock().push(report.clone());
        self.choice
    }
}

/// Records every stop report an instance handle receives.
#[derive(Default)]
pub struct RecordingObserver {
    pub reports: Mutex<Vec<(String, ChildStatus)>>,
}

impl StopObserver for RecordingObserver {
    fn stop_report(&self, addon_id: &str, status: ChildStatus) {
        self.reports.lock().push((addon_id.to_string(), status));
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Host plus everything a test wants to inspect.
pub struct TestHost {
    pub host: AddonHost,
    pub catalog: Arc<InMemoryCatalog>,
    pub reporter: Arc<RecordingReporter>,
    pub tally: Arc<AddonTally>,
    pub launchers: Option<Arc<MockLaunchers>>,
    pub socket_kills: Arc<AtomicUsize>,
    pub dir: tempfile::TempDir,
}

impl TestHost {
    pub fn mock(&self) -> &MockLaunchers {
        self.launchers
            .as_ref()
            .expect("host was built with the socket launcher")
    }

    pub fn profile_path(&self, addon_id: &str) -> PathBuf {
        self.dir.path().join("profiles").join(addon_id)
    }
}

pub fn test_config(dir: &Path) -> ControllerConfig {
    ControllerConfig {
        report_path: dir.to_path_buf(),
        rendezvous_dir: dir.to_path_buf(),
        idle_timeout_ms: None,
        sweep_interval_ms: TEST_SWEEP_MS,
        call_timeout_ms: 2000,
        kill_timeout_ms: 500,
        connect_timeout_ms: 2000,
        start_timeout_ms: 2000,
        no_sandbox: true,
        debug: false,
        ..ControllerConfig::default()
    }
}

fn install(catalog: &InMemoryCatalog, dir: &Path, id: &str, addon_type: AddonType) {
    let addon_dir = dir.join("addons").join(id);
    std::fs::create_dir_all(&addon_dir).unwrap();
    let binary = addon_dir.join(id);
    std::fs::write(&binary, b"").unwrap();

    catalog.insert(
        AddonInfo::new(id, addon_type, binary)
            .with_profile_path(dir.join("profiles").join(id))
            .with_setting(SettingDefinition::new("enabled", SettingValue::Bool(false)))
            .with_setting(SettingDefinition::new("speed", SettingValue::Int(DEFAULT_SPEED)))
            .with_setting(SettingDefinition::new(
                "title",
                SettingValue::String("kodi".to_string()),
            )),
    );
}

fn build_host(
    tally: Arc<AddonTally>,
    reporter: Arc<RecordingReporter>,
    socket: bool,
    configure: impl FnOnce(&mut ControllerConfig),
) -> TestHost {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(InMemoryCatalog::new());
    install(&catalog, dir.path(), SCREENSAVER, AddonType::Screensaver);
    install(&catalog, dir.path(), VISUALIZATION, AddonType::Visualization);
    install(&catalog, dir.path(), EXECUTABLE, AddonType::Executable);

    let mut config = test_config(dir.path());
    let socket_kills = Arc::new(AtomicUsize::new(0));
    let (factory, launchers) = if socket {
        // Sandboxed launches check for the launcher and the devkit.
        let launcher_exe = dir.path().join("kodi-addon-launcher");
        let devkit_lib = dir.path().join("libkodidevkit.so");
        std::fs::write(&launcher_exe, b"").unwrap();
        std::fs::write(&devkit_lib, b"").unwrap();
        config.launcher_exe = launcher_exe;
        config.devkit_lib = devkit_lib;
        config.no_sandbox = false;
        (SocketLauncher::factory(&tally, &socket_kills), None)
    } else {
        let launchers = MockLaunchers::new(&tally);
        (launchers.factory(), Some(launchers))
    };
    configure(&mut config);

    let host = AddonHost::builder(catalog.clone())
        .config(config)
        .crash_reporter(reporter.clone())
        .launcher_factory(factory)
        .build()
        .expect("Failed to start test host");

    TestHost {
        host,
        catalog,
        reporter,
        tally,
        launchers,
        socket_kills,
        dir,
    }
}

/// Host with in-process mock launchers and no idle timeout.
pub fn mock_host(tally: Arc<AddonTally>) -> TestHost {
    mock_host_with(tally, CrashReportChoice::Ignore, |_| {})
}

pub fn mock_host_with(
    tally: Arc<AddonTally>,
    choice: CrashReportChoice,
    configure: impl FnOnce(&mut ControllerConfig),
) -> TestHost {
    build_host(tally, RecordingReporter::new(choice), false, configure)
}

/// Host whose add-ons are served over unix sockets.
pub fn socket_host(tally: Arc<AddonTally>, configure: impl FnOnce(&mut ControllerConfig)) -> TestHost {
    build_host(
        tally,
        RecordingReporter::new(CrashReportChoice::Ignore),
        true,
        configure,
    )
}
