use std::{
    process::Child,
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant},
};

use anyhow::{self, Context};
use cgroups_rs::Cgroup;
use tracing::{trace, warn};

use super::{create_process, kill_process_tree, CgroupLimits};

pub fn get_current_user_id() -> anyhow::Result<String> {
    let output = std::process::Command::new("id")
        .arg("-u")
        .output()
        .context("Could not launch 'id -u'")?;
    let stdout = output.stdout;
    let untrimed_id = std::str::from_utf8(&stdout).context("id is not a valid string")?;
    Ok(untrimed_id.trim().to_string())
}

/// Delegated cgroup subtree of the current user's systemd service.
pub fn get_cgroup_path(user_id: &str, group_name: &str) -> String {
    format!("user.slice/user-{user_id}.slice/user@{user_id}.service/{group_name}")
}

/// Create a cgroup at `path` with the given limits.
///
/// # Errors
///
/// Fails if cgroups v2 is unavailable, not delegated to this user, or the limits are rejected.
pub fn create_cgroup(path: &str, limits: &CgroupLimits) -> anyhow::Result<Cgroup> {
    let mut builder = cgroups_rs::cgroup_builder::CgroupBuilder::new(path);
    if limits.max_memory > 0 {
        builder = builder
            .memory()
            .memory_hard_limit(limits.max_memory)
            .done();
    }
    if limits.max_pids > 0 {
        builder = builder
            .pid()
            .maximum_number_of_processes(cgroups_rs::MaxValue::Value(limits.max_pids))
            .done();
    }
    if limits.cpu_quota > 0 && limits.cpu_period > 0 {
        builder = builder
            .cpu()
            .quota(limits.cpu_quota)
            .period(limits.cpu_period)
            .done();
    }
    builder
        .build(cgroups_rs::hierarchies::auto())
        .context("could not create cgroup")
}

#[derive(Debug)]
pub struct TimeoutError {}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Timeout Error")
    }
}

impl std::error::Error for TimeoutError {}

pub fn wait_for_process_cleanup(
    cgroup: &Cgroup,
    pid: u64,
    max_duration: Duration,
) -> Result<(), TimeoutError> {
    let deadline = Instant::now() + max_duration;
    while cgroup.tasks().iter().any(|cpid| cpid.pid == pid) {
        if Instant::now() > deadline {
            return Err(TimeoutError {});
        }
        std::thread::sleep(std::cmp::min(Duration::from_millis(10), max_duration / 10));
    }
    Ok(())
}

fn create_process_in_cgroup(
    command: &str,
    args: &[String],
    envs: &[(String, String)],
    group: &Cgroup,
) -> anyhow::Result<Child> {
    let mut child = create_process(command, args, envs)?;

    let pid = child.id() as u64;
    let addition = group.add_task_by_tgid(cgroups_rs::CgroupPid { pid });
    if addition.is_err() {
        let kill = child.kill();
        let _ = child.wait();

        addition.with_context(|| {
            if let Err(err) = kill {
                format!(
                    "could not add process to cgroup, and process could not be killed either ({err})"
                )
            } else {
                "could not add process to cgroup".to_string()
            }
        })?;
    }
    Ok(child)
}

/// A child process, optionally confined to its own cgroup, killed (with its whole cgroup) on
/// drop if nobody cleaned it up before.
#[derive(Debug)]
pub struct LimitedProcess {
    pub child: Child,
    cgroup: Option<Cgroup>,
    cleaned_up: bool,
}

impl LimitedProcess {
    pub fn launch(
        command: &str,
        args: &[String],
        envs: &[(String, String)],
        limits: &CgroupLimits,
    ) -> anyhow::Result<LimitedProcess> {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        let user_id = get_current_user_id().context("could not get user id")?;
        // one cgroup per process; the pid keeps names unique across concurrent schedulers
        let group_name = format!(
            "FARM_ARENA_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let path = get_cgroup_path(&user_id, &group_name);
        let group = create_cgroup(&path, limits).context("could not create cgroup")?;
        let child = create_process_in_cgroup(command, args, envs, &group).with_context(|| {
            let _ = group.delete();
            "could not create process in cgroup"
        })?;
        trace!(pid = child.id(), %path, "process started in cgroup");

        Ok(LimitedProcess {
            child,
            cgroup: Some(group),
            cleaned_up: false,
        })
    }

    pub fn launch_without_container(
        command: &str,
        args: &[String],
        envs: &[(String, String)],
    ) -> anyhow::Result<LimitedProcess> {
        let child = create_process(command, args, envs).context("could not create process")?;

        Ok(LimitedProcess {
            child,
            cgroup: None,
            cleaned_up: false,
        })
    }

    pub fn is_contained(&self) -> bool {
        self.cgroup.is_some()
    }

    /// Kill the process (and everything else in its cgroup), then remove the cgroup.
    pub fn try_kill(&mut self, max_duration: Duration) -> anyhow::Result<()> {
        match &mut self.cgroup {
            Some(cgroup) => {
                cgroup.kill().context("could not kill process")?;
                let _ = self.child.wait();
                wait_for_process_cleanup(cgroup, self.child.id() as u64, max_duration)
                    .context("process cleanup timed out")?;
                // the process is gone; a cgroup left behind only costs a directory
                self.cleaned_up = true;
                if let Err(e) = cgroup.delete() {
                    warn!("Failed to remove cgroup. If this happens a lot, it may slow down the computer. {e}");
                }
                Ok(())
            }
            None => {
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
    }
}

impl Drop for LimitedProcess {
    fn drop(&mut self) {
        static CLEANUP_DURATION: Duration = Duration::from_secs(1);
        if !self.cleaned_up {
            if let Err(e) = self.try_kill(CLEANUP_DURATION) {
                warn!("could not kill process/cgroup on LimitedProcess::drop: {e:#}");
            }
        }
    }
}
