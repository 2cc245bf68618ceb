//! Child process launcher for sandboxed add-ons.

use super::{ChildStatus, LaunchCommand, LaunchOutcome, Launcher};
use crate::error::{InterfaceError, LaunchStage, Result};
use crate::protocol::RENDEZVOUS_DIR_ENV;
use parking_lot::Mutex;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Bytes of child stderr kept for crash reports.
const STACK_TRACE_TAIL: usize = 64 * 1024;

pub struct PosixLauncher {
    addon_id: String,
    child: Option<Child>,
    exit: Option<ExitStatus>,
    stderr_tail: Arc<Mutex<String>>,
}

impl PosixLauncher {
    pub fn new(addon_id: impl Into<String>) -> Self {
        Self {
            addon_id: addon_id.into(),
            child: None,
            exit: None,
            stderr_tail: Arc::new(Mutex::new(String::new())),
        }
    }

    fn spawn_stderr_reader(&self, child: &mut Child) {
        let Some(mut stderr) = child.stderr.take() else {
            return;
        };
        let tail = Arc::clone(&self.stderr_tail);
        let addon_id = self.addon_id.clone();

        let spawned = thread::Builder::new()
            .name(format!("addon-stderr-{addon_id}"))
            .spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match stderr.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let text = String::from_utf8_lossy(&buf[..n]);
                            tracing::debug!(addon = %addon_id, "{}", text.trim_end());
                            let mut tail = tail.lock();
                            tail.push_str(&text);
                            if tail.len() > STACK_TRACE_TAIL {
                                let mut cut = tail.len() - STACK_TRACE_TAIL;
                                while !tail.is_char_boundary(cut) {
                                    cut += 1;
                                }
                                tail.drain(..cut);
                            }
                        }
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(addon = %self.addon_id, "failed to start stderr reader: {e}");
        }
    }

    fn classify(status: ExitStatus) -> ChildStatus {
        if status.code().is_some() {
            return ChildStatus::ExitedNormally;
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            match status.signal() {
                Some(libc::SIGSEGV) => ChildStatus::SegmentationFault,
                Some(_) => ChildStatus::StoppedBySignal,
                None => ChildStatus::StoppedByUnknown,
            }
        }

        #[cfg(not(unix))]
        {
            ChildStatus::StoppedByUnknown
        }
    }

    fn poll_exit(&mut self) -> Option<ExitStatus> {
        if self.exit.is_some() {
            return self.exit;
        }
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                self.exit = Some(status);
                self.exit
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(addon = %self.addon_id, "failed to poll child: {e}");
                None
            }
        }
    }

    fn wait_for_exit(&mut self, attempts: u32, interval: Duration) -> bool {
        for _ in 0..attempts {
            if self.poll_exit().is_some() {
                return true;
            }
            thread::sleep(interval);
        }
        self.poll_exit().is_some()
    }

    #[cfg(unix)]
    fn terminate(&self, pid: u32) {
        // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            tracing::debug!(addon = %self.addon_id, pid, "SIGTERM failed");
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self, _pid: u32) {}
}

impl Launcher for PosixLauncher {
    fn launch(&mut self, command: &LaunchCommand) -> Result<LaunchOutcome> {
        let argv = command.to_argv();
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .env(RENDEZVOUS_DIR_ENV, &command.rendezvous_dir)
            .stdin(Stdio::null())
            .stderr(Stdio::piped());

        #[cfg(target_os = "linux")]
        {
            use std::os::unix::process::CommandExt;
            // SAFETY: prctl is async-signal-safe and touches no host state.
            unsafe {
                cmd.pre_exec(|| {
                    libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL);
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn().map_err(|e| InterfaceError::LaunchFailed {
            addon_id: self.addon_id.clone(),
            stage: LaunchStage::Spawn,
            reason: e.to_string(),
        })?;
        let pid = child.id();
        tracing::debug!(addon = %self.addon_id, pid, "spawned add-on process");

        self.spawn_stderr_reader(&mut child);
        self.exit = None;
        self.child = Some(child);
        Ok(LaunchOutcome::Spawned { pid })
    }

    fn supports_non_blocking(&self, _binary: &Path) -> bool {
        false
    }

    fn kill(&mut self, wait: bool) -> bool {
        let Some(pid) = self.child.as_ref().map(Child::id) else {
            return false;
        };
        if self.poll_exit().is_some() {
            return false;
        }

        if wait {
            // Give the add-on a moment to honour the kill request itself.
            if self.wait_for_exit(10, Duration::from_millis(10)) {
                return true;
            }
            self.terminate(pid);
            if self.wait_for_exit(50, Duration::from_millis(50)) {
                return true;
            }
            tracing::warn!(addon = %self.addon_id, pid, "add-on ignored SIGTERM, killing");
        }

        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.kill() {
                tracing::warn!(addon = %self.addon_id, pid, "kill failed: {e}");
            }
            match child.wait() {
                Ok(status) => self.exit = Some(status),
                Err(e) => tracing::warn!(addon = %self.addon_id, pid, "wait failed: {e}"),
            }
        }
        true
    }

    fn process_active(&mut self) -> ChildStatus {
        if self.child.is_none() {
            return ChildStatus::NotStarted;
        }
        match self.poll_exit() {
            None => ChildStatus::Running,
            Some(status) => Self::classify(status),
        }
    }

    fn stack_trace(&self) -> String {
        self.stderr_tail.lock().clone()
    }

    fn main_pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }
}

impl Drop for PosixLauncher {
    fn drop(&mut self) {
        if self.child.is_some() && self.poll_exit().is_none() {
            self.kill(false);
        }
    }
}
