//! Add-on server - runs inside the sandboxed add-on process
//!
//! The server connects the primary link, starts the add-on entry and answers
//! host calls until the host asks the add-on to stop or goes away.

use crate::args::RunnerArgs;
use crate::error::{Result, RunnerError};
use crate::link::RunnerLink;
use clap::Parser;
use kodi_addon_ifc::protocol::{
    endpoint_path, rendezvous_dir_from_env, API_VERSION_MAJOR, PRIMARY_THREAD_ID,
};
use kodi_addon_ifc::AddonEntry;
use std::path::PathBuf;
use std::sync::Arc;

pub struct AddonServer {
    args: RunnerArgs,
    /// Arguments as the host passed them, handed to the entry on start.
    raw_args: Vec<String>,
    rendezvous_dir: PathBuf,
    entry: Arc<dyn AddonEntry>,
}

impl AddonServer {
    /// `argv` includes the program name.
    pub fn from_argv(argv: Vec<String>, entry: Arc<dyn AddonEntry>) -> Result<Self> {
        let args = RunnerArgs::try_parse_from(&argv)?;
        Ok(Self {
            args,
            raw_args: argv.into_iter().skip(1).collect(),
            rendezvous_dir: rendezvous_dir_from_env(),
            entry,
        })
    }

    pub fn with_rendezvous_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.rendezvous_dir = dir.into();
        self
    }

    pub fn args(&self) -> &RunnerArgs {
        &self.args
    }

    pub fn run(self) -> Result<()> {
        if self.args.api != API_VERSION_MAJOR {
            return Err(RunnerError::ApiMismatch {
                host: self.args.api,
                addon: API_VERSION_MAJOR,
            });
        }

        let endpoint = endpoint_path(&self.rendezvous_dir, &self.args.uuid, PRIMARY_THREAD_ID);
        let link = RunnerLink::connect(
            &endpoint,
            &self.args.uuid,
            PRIMARY_THREAD_ID,
            Arc::downgrade(&self.entry),
        )?;

        let status = self.entry.start(&self.raw_args, link.clone());
        if !status.is_ok() {
            tracing::error!(uuid = %self.args.uuid, %status, "add-on failed to start");
            link.close();
            return Err(RunnerError::StartFailed(status));
        }

        tracing::info!(uuid = %self.args.uuid, "add-on started");
        link.serve();
        link.close();
        tracing::info!(uuid = %self.args.uuid, stopped = link.is_stopping(), "add-on finished");
        Ok(())
    }
}
