use std::{process::Child, time::Duration};

use anyhow::{self, bail, Context};
use tracing::warn;

use super::{create_process, kill_process_tree, CgroupLimits};

#[derive(Debug)]
pub struct LimitedProcess {
    pub child: Child,
    cleaned_up: bool,
}

impl LimitedProcess {
    pub fn launch(
        _command: &str,
        _args: &[String],
        _envs: &[(String, String)],
        _limits: &CgroupLimits,
    ) -> anyhow::Result<LimitedProcess> {
        bail!("cgroups only available on linux")
    }

    pub fn launch_without_container(
        command: &str,
        args: &[String],
        envs: &[(String, String)],
    ) -> anyhow::Result<LimitedProcess> {
        let child = create_process(command, args, envs).context("could not create process")?;

        Ok(LimitedProcess {
            child,
            cleaned_up: false,
        })
    }

    pub fn is_contained(&self) -> bool {
        false
    }

    pub fn try_kill(&mut self, _max_duration: Duration) -> anyhow::Result<()> {
        // before the reap, while descendants are still attached to it
        kill_process_tree(&self.child);
        if self.child.try_wait()?.is_none() {
            self.child.kill().context("could not kill process")?;
            self.child.wait().context("could not reap process")?;
        }
        self.cleaned_up = true;
        Ok(())
    }
}

impl Drop for LimitedProcess {
    fn drop(&mut self) {
        static CLEANUP_DURATION: Duration = Duration::from_secs(1);
        if !self.cleaned_up {
            if let Err(e) = self.try_kill(CLEANUP_DURATION) {
                warn!("could not kill process on LimitedProcess::drop: {e:#}");
            }
        }
    }
}
