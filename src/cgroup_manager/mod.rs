//! Child processes contained in a cgroup v2 (Linux only).
//!
//! On other platforms only [`LimitedProcess::launch_without_container`] works.

#[cfg(target_os = "linux")]
mod cgroup_manager_linux;

#[cfg(target_os = "linux")]
pub use cgroup_manager_linux::*;

#[cfg(not(target_os = "linux"))]
mod cgroup_manager_stub;

use std::process::{Child, Stdio};

use anyhow::Context;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::trace;

use crate::bridge::{signal_group, Signal};
#[cfg(not(target_os = "linux"))]
pub use cgroup_manager_stub::*;

/// Limits applied to the cgroup of one [`LimitedProcess`]. Non-positive values mean no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CgroupLimits {
    /// bytes
    pub max_memory: i64,
    pub max_pids: i64,
    /// CPU time allowed per `cpu_period`, in microseconds
    pub cpu_quota: i64,
    pub cpu_period: u64,
}

/// Spawn with stdin closed and stdout/stderr piped back to the caller. On unix the child leads
/// a new process group, which [`LimitedProcess::try_kill`] signals as a whole.
pub(self) fn create_process(
    command: &str,
    args: &[String],
    envs: &[(String, String)],
) -> anyhow::Result<Child> {
    let mut cmd = std::process::Command::new(command);
    cmd.args(args)
        .envs(envs.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd.spawn()
        .with_context(|| format!("command '{command}' not found"))
}

/// SIGKILL the process group led by `child` and every live descendant of `child`, whatever
/// group it moved to. Used when there is no cgroup to kill everything at once.
///
/// Descendants are looked up while `child` still runs; once it is reaped they are re-parented
/// and only the group kill can reach them.
pub(self) fn kill_process_tree(child: &Child) {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    let mut tree = vec![Pid::from_u32(child.id())];
    let mut next = 0;
    while let Some(&parent) = tree.get(next) {
        tree.extend(
            sys.processes()
                .values()
                .filter(|p| p.parent() == Some(parent))
                .map(|p| p.pid()),
        );
        next += 1;
    }

    signal_group(child, Signal::Kill);
    for pid in &tree[1..] {
        if let Some(process) = sys.process(*pid) {
            process.kill();
        }
    }
    trace!(pid = child.id(), descendants = tree.len() - 1, "process tree killed");
}
