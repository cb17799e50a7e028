use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use tracing::{debug, error, info, instrument, warn};

use super::{tail, Sandbox, BOT_CODE_VAR};
use crate::bridge::wait_for_exit;
use crate::configuration::Configuration;
use crate::constraints::Constraints;
use crate::error::SandboxError;

const STDERR_TAIL: usize = 2000;

/// Runs every job in a fresh container of a shared image, driven through the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    docker: String,
    image: String,
    build_context: PathBuf,
    constraints: Constraints,
}

impl DockerSandbox {
    pub fn new(config: &Configuration, constraints: Constraints) -> DockerSandbox {
        DockerSandbox {
            docker: "docker".to_string(),
            image: config.image().to_string(),
            build_context: config.build_context().to_path_buf(),
            constraints,
        }
    }

    /// Use another docker-compatible CLI (e.g. `podman`).
    #[must_use]
    pub fn with_docker_command(mut self, program: impl Into<String>) -> Self {
        self.docker = program.into();
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.docker);
        cmd.stdin(Stdio::null());
        cmd
    }

    fn output(&self, args: &[&str]) -> std::io::Result<Output> {
        self.command().args(args).output()
    }

    fn image_exists(&self) -> std::io::Result<bool> {
        let status = self
            .command()
            .args(["image", "inspect", &self.image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        Ok(status.success())
    }

    fn start_container(&self, encoded_source: &str) -> Result<Container<'_>, SandboxError> {
        let c = &self.constraints;
        let mut cmd = self.command();
        cmd.args(["run", "-d"]);
        if !c.network() {
            cmd.arg("--network=none");
        }
        cmd.arg("--memory")
            .arg(format!("{}m", c.memory_mb()))
            .arg("--cpus")
            .arg(c.cpu_fraction().to_string())
            .arg("--pids-limit")
            .arg(c.pids_limit().to_string())
            .args(["--security-opt", "no-new-privileges"])
            .args(["--cap-drop", "ALL"]);
        for (key, value) in c.runner_env() {
            cmd.arg("-e").arg(format!("{key}={value}"));
        }
        // the value itself travels through our environment, not the command line
        cmd.arg("-e").arg(BOT_CODE_VAR).env(BOT_CODE_VAR, encoded_source);
        cmd.arg(&self.image);

        let output = cmd
            .output()
            .map_err(|e| SandboxError::Launch(format!("could not run {}: {e}", self.docker)))?;
        if !output.status.success() {
            return Err(SandboxError::Launch(tail(
                &String::from_utf8_lossy(&output.stderr),
                STDERR_TAIL,
            )));
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(SandboxError::Launch("no container id returned".to_string()));
        }
        debug!(container = %id, "container started");
        Ok(Container { sandbox: self, id })
    }
}

/// A started container, force-removed on drop.
struct Container<'a> {
    sandbox: &'a DockerSandbox,
    id: String,
}

impl Container<'_> {
    /// Exit code, or `None` if the wall clock ran out first.
    fn wait(&self) -> Result<Option<i32>, SandboxError> {
        let mut waiter = self
            .sandbox
            .command()
            .args(["wait", &self.id])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let Some(status) = wait_for_exit(&mut waiter, self.sandbox.constraints.wall_clock())? else {
            let _ = waiter.kill();
            let _ = waiter.wait();
            return Ok(None);
        };
        let mut printed = String::new();
        if let Some(mut stdout) = waiter.stdout.take() {
            stdout.read_to_string(&mut printed)?;
        }
        if !status.success() {
            return Err(SandboxError::Launch(format!(
                "could not wait for container {}",
                self.id
            )));
        }
        printed
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SandboxError::Launch(format!("unexpected exit code '{}'", printed.trim())))
    }

    fn logs(&self) -> Result<(String, String), SandboxError> {
        let output = self.sandbox.output(&["logs", &self.id])?;
        Ok((
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

impl Drop for Container<'_> {
    fn drop(&mut self) {
        match self.sandbox.output(&["rm", "-f", &self.id]) {
            Ok(output) if output.status.success() => debug!(container = %self.id, "container removed"),
            Ok(output) => warn!(
                container = %self.id,
                "could not remove container: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => warn!(container = %self.id, "could not remove container: {e}"),
        }
    }
}

impl Sandbox for DockerSandbox {
    fn name(&self) -> &'static str {
        "docker"
    }

    #[instrument(skip(self), fields(image = %self.image))]
    fn ensure_image(&self) -> Result<(), SandboxError> {
        let exists = self
            .image_exists()
            .map_err(|e| SandboxError::ImageBuild(format!("could not run {}: {e}", self.docker)))?;
        if exists {
            debug!("image already present");
            return Ok(());
        }
        info!(context = %self.build_context.display(), "building image");
        let output = self
            .command()
            .arg("build")
            .arg("-t")
            .arg(&self.image)
            .arg(&self.build_context)
            .output()
            .map_err(|e| SandboxError::ImageBuild(format!("could not run {}: {e}", self.docker)))?;
        if !output.status.success() {
            let stderr = tail(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL);
            error!("image build failed: {stderr}");
            return Err(SandboxError::ImageBuild(stderr));
        }
        info!("image built");
        Ok(())
    }

    #[instrument(skip_all)]
    fn launch(&self, encoded_source: &str) -> Result<String, SandboxError> {
        let container = self.start_container(encoded_source)?;
        let Some(code) = container.wait()? else {
            warn!(container = %container.id, "wall clock exceeded, removing container");
            return Err(SandboxError::Timeout(self.constraints.wall_clock()));
        };
        let (stdout, stderr) = container.logs()?;
        if code != 0 {
            return Err(SandboxError::NonZeroExit {
                code,
                stderr: tail(&stderr, STDERR_TAIL),
            });
        }
        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintsBuilder;

    #[test]
    fn missing_cli_is_a_launch_error() {
        let sandbox = DockerSandbox::new(
            &Configuration::new(),
            ConstraintsBuilder::new().build().unwrap(),
        )
        .with_docker_command("definitely-not-a-container-runtime");
        assert!(matches!(
            sandbox.ensure_image(),
            Err(SandboxError::ImageBuild(_))
        ));
        assert!(matches!(sandbox.launch("AA=="), Err(SandboxError::Launch(_))));
    }
}
