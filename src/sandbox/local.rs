use std::io::Read;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::thread::{self, JoinHandle};

use anyhow::Context;
use tracing::{debug, instrument, warn};

use super::{tail, Sandbox, BOT_CODE_VAR};
use crate::bridge::wait_for_exit;
use crate::cgroup_manager::LimitedProcess;
use crate::configuration::Configuration;
use crate::constraints::Constraints;
use crate::error::SandboxError;

const STDERR_TAIL: usize = 2000;

/// Runs the runner binary as a direct child, confined to its own cgroup.
///
/// There is no network isolation here; use [`super::DockerSandbox`] for that.
#[derive(Debug, Clone)]
pub struct LocalSandbox {
    command: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    constraints: Constraints,
    allow_uncontained: bool,
}

impl LocalSandbox {
    /// Sandbox running the `farm-runner` binary installed next to the current executable.
    pub fn new(config: &Configuration, constraints: Constraints) -> anyhow::Result<LocalSandbox> {
        let exe = std::env::current_exe().context("could not locate current executable")?;
        let runner = exe
            .parent()
            .map(|dir| dir.join("farm-runner"))
            .unwrap_or_else(|| PathBuf::from("farm-runner"));

        let mut envs = constraints.runner_env();
        envs.push(("FARM_INTERPRETER".to_string(), config.interpreter().to_string()));
        envs.push((
            "FARM_SOURCE_EXTENSION".to_string(),
            config.source_extension().to_string(),
        ));
        envs.push((
            "FARM_DEBUG_BOT_STDERR".to_string(),
            config.debug_bot_stderr().to_string(),
        ));

        Ok(LocalSandbox {
            command: runner.to_string_lossy().into_owned(),
            args: vec![],
            envs,
            constraints,
            allow_uncontained: config.allow_uncontained(),
        })
    }

    /// Run another program in place of `farm-runner`.
    #[must_use]
    pub fn with_runner(mut self, command: impl Into<String>, args: &[&str]) -> Self {
        self.command = command.into();
        self.args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    fn spawn(&self, encoded_source: &str) -> Result<LimitedProcess, SandboxError> {
        let mut envs = self.envs.clone();
        envs.push((BOT_CODE_VAR.to_string(), encoded_source.to_string()));

        match LimitedProcess::launch(
            &self.command,
            &self.args,
            &envs,
            &self.constraints.cgroup_limits(),
        ) {
            Ok(process) => Ok(process),
            Err(e) if self.allow_uncontained => {
                warn!("running bot without cgroup: {e:#}");
                LimitedProcess::launch_without_container(&self.command, &self.args, &envs)
                    .map_err(|e| SandboxError::Launch(format!("{e:#}")))
            }
            Err(e) => Err(SandboxError::Launch(format!("{e:#}"))),
        }
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = vec![];
        if let Err(e) = pipe.read_to_end(&mut buf) {
            debug!("could not read runner output: {e}");
        }
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|r| r.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn exit_code(status: ExitStatus) -> i32 {
    // killed by a signal: report it like a shell would
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(-1)
}

impl Sandbox for LocalSandbox {
    fn name(&self) -> &'static str {
        "local"
    }

    fn ensure_image(&self) -> Result<(), SandboxError> {
        let path = PathBuf::from(&self.command);
        if path.is_absolute() && !path.exists() {
            return Err(SandboxError::ImageBuild(format!(
                "runner binary not found at {}",
                path.display()
            )));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(runner = %self.command))]
    fn launch(&self, encoded_source: &str) -> Result<String, SandboxError> {
        let mut process = self.spawn(encoded_source)?;
        debug!(
            pid = process.child.id(),
            contained = process.is_contained(),
            "runner started"
        );
        let stdout = process.child.stdout.take().map(drain);
        let stderr = process.child.stderr.take().map(drain);

        let status = wait_for_exit(&mut process.child, self.constraints.wall_clock())?;
        // kills leftovers and removes the cgroup even after a normal exit
        if let Err(e) = process.try_kill(self.constraints.kill_grace()) {
            warn!("runner cleanup failed: {e:#}");
        }

        let Some(status) = status else {
            // readers are left behind: an escaped grandchild may still hold the pipes
            warn!("wall clock exceeded, runner killed");
            return Err(SandboxError::Timeout(self.constraints.wall_clock()));
        };

        let stdout = collect(stdout);
        let stderr = collect(stderr);
        if !status.success() {
            return Err(SandboxError::NonZeroExit {
                code: exit_code(status),
                stderr: tail(&stderr, STDERR_TAIL),
            });
        }
        Ok(stdout)
    }
}
