//! Crash reporting.
//!
//! The sweep never waits for the user. It posts a [`CrashReport`] to the
//! [`CrashReportQueue`], whose worker thread asks the [`CrashReporter`] what
//! to do and disables the add-on if told so.

use crate::addon::AddonLanguage;
use crate::catalog::{AddonCatalog, DisabledReason};
use crate::launcher::ChildStatus;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub addon_id: String,
    pub uuid: String,
    pub status: ChildStatus,
    pub stacktrace: String,
    pub report_path: PathBuf,
    pub language: AddonLanguage,
}

impl CrashReport {
    /// JVM add-ons write `hs_err_pid<uuid>.log` into the report directory.
    pub fn jvm_report_file(&self) -> PathBuf {
        self.report_path.join(format!("hs_err_pid{}.log", self.uuid))
    }

    /// Text shown to the user when reporting the crash.
    pub fn details(&self) -> String {
        if self.language == AddonLanguage::Java {
            return match std::fs::read(self.jvm_report_file()) {
                Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
                Err(_) => String::new(),
            };
        }
        self.stacktrace.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashReportChoice {
    Ignore,
    DisableAddon,
    DisableAddonAndReport,
}

/// User-facing side of crash handling.
pub trait CrashReporter: Send + Sync {
    fn ask(&self, report: &CrashReport) -> CrashReportChoice;

    fn submit(&self, _report: &CrashReport, _details: &str) {}
}

/// Reporter for headless hosts.
pub struct IgnoreCrashes;

impl CrashReporter for IgnoreCrashes {
    fn ask(&self, report: &CrashReport) -> CrashReportChoice {
        tracing::info!(addon = %report.addon_id, uuid = %report.uuid, "ignoring add-on crash");
        CrashReportChoice::Ignore
    }
}

pub struct CrashReportQueue {
    sender: Mutex<Option<Sender<CrashReport>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CrashReportQueue {
    pub fn start(
        reporter: Arc<dyn CrashReporter>,
        catalog: Arc<dyn AddonCatalog>,
    ) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<CrashReport>();
        let worker = thread::Builder::new()
            .name("addon-crash-report".to_string())
            .spawn(move || {
                for report in receiver {
                    handle_report(reporter.as_ref(), catalog.as_ref(), &report);
                }
            })?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn post(&self, report: CrashReport) {
        match self.sender.lock().as_ref() {
            Some(sender) => {
                if sender.send(report).is_err() {
                    tracing::warn!("crash report worker is gone");
                }
            }
            None => tracing::debug!(addon = %report.addon_id, "crash report dropped after stop"),
        }
    }

    /// Handles the reports already queued, then joins the worker.
    pub fn stop(&self) {
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("crash report worker panicked");
            }
        }
    }
}

impl Drop for CrashReportQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_report(reporter: &dyn CrashReporter, catalog: &dyn AddonCatalog, report: &CrashReport) {
    let choice = reporter.ask(report);
    tracing::debug!(addon = %report.addon_id, ?choice, "crash report answered");
    match choice {
        CrashReportChoice::Ignore => {}
        CrashReportChoice::DisableAddonAndReport => {
            reporter.submit(report, &report.details());
            catalog.disable(&report.addon_id, DisabledReason::PermanentFailure);
        }
        CrashReportChoice::DisableAddon => {
            catalog.disable(&report.addon_id, DisabledReason::PermanentFailure);
        }
    }
}
