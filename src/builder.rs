//! Builder for configuring and constructing an `AddonHost`.

use crate::{AddonHost, Result};
use kodi_addon_ifc::{
    AddonCatalog, Controller, ControllerConfig, CrashReporter, DirectRegistry, LauncherFactory,
    SettingsDialogs,
};
use std::sync::Arc;

/// Everything except the catalog has a default. Sandboxed launches need the
/// launcher executable and the devkit library to exist, which `build` checks
/// unless `no_sandbox` is set.
///
/// # Example
///
/// ```ignore
/// use kodi_addons::prelude::*;
///
/// let catalog = Arc::new(InMemoryCatalog::new());
/// catalog.insert(AddonInfo::new("screensaver.test", AddonType::Screensaver, binary));
///
/// let host = AddonHost::builder(catalog)
///     .idle_timeout_ms(Some(5000))
///     .build()?;
///
/// let screensaver = host.create_instance("screensaver.test", InstanceKind::Screensaver)?;
/// ```
pub struct AddonHostBuilder {
    catalog: Arc<dyn AddonCatalog>,
    config: ControllerConfig,
    dialogs: Option<Arc<SettingsDialogs>>,
    crash_reporter: Option<Arc<dyn CrashReporter>>,
    launcher_factory: Option<LauncherFactory>,
    direct_registry: DirectRegistry,
}

impl AddonHostBuilder {
    pub(crate) fn new(catalog: Arc<dyn AddonCatalog>) -> Self {
        Self {
            catalog,
            config: ControllerConfig::default(),
            dialogs: None,
            crash_reporter: None,
            launcher_factory: None,
            direct_registry: DirectRegistry::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Keep unused processes alive this long; `None` stops them with their
    /// last instance.
    pub fn idle_timeout_ms(mut self, timeout: Option<u64>) -> Self {
        self.config.idle_timeout_ms = timeout;
        self
    }

    /// Run every add-on in-process.
    pub fn no_sandbox(mut self, no_sandbox: bool) -> Self {
        self.config.no_sandbox = no_sandbox;
        self
    }

    pub fn dialogs(mut self, dialogs: Arc<SettingsDialogs>) -> Self {
        self.dialogs = Some(dialogs);
        self
    }

    pub fn crash_reporter(mut self, reporter: Arc<dyn CrashReporter>) -> Self {
        self.crash_reporter = Some(reporter);
        self
    }

    pub fn launcher_factory(mut self, factory: LauncherFactory) -> Self {
        self.launcher_factory = Some(factory);
        self
    }

    /// Add-ons linked into the host binary.
    pub fn direct_registry(mut self, registry: DirectRegistry) -> Self {
        self.direct_registry = registry;
        self
    }

    /// Build the controller and start its sweep.
    pub fn build(self) -> Result<AddonHost> {
        let mut builder = Controller::builder(self.catalog)
            .config(self.config)
            .direct_registry(self.direct_registry);
        if let Some(dialogs) = self.dialogs {
            builder = builder.dialogs(dialogs);
        }
        if let Some(reporter) = self.crash_reporter {
            builder = builder.crash_reporter(reporter);
        }
        if let Some(factory) = self.launcher_factory {
            builder = builder.launcher_factory(factory);
        }

        let controller = builder.build()?;
        controller.start()?;
        tracing::info!(
            no_sandbox = controller.config().no_sandbox,
            idle_timeout_ms = ?controller.config().idle_timeout_ms,
            "add-on host started"
        );
        Ok(AddonHost::from_controller(controller))
    }
}
