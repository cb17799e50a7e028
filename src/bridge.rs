//! Line-based exchange with an untrusted child process.
//!
//! The child's stdin and stdout are each served by one dedicated thread, so neither a bot that
//! stops reading nor one that stops writing can block the engine: [`ProcessBridge::send`] only
//! queues the line, and [`ProcessBridge::receive`] waits on a channel with a deadline.
//!
//! Every exchange starts clean: lines the bot wrote before a request is sent (late replies to an
//! expired exchange, unsolicited output) are dropped, so only what arrives after the request
//! can answer it.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tempfile::TempPath;
use tracing::{debug, instrument, trace, warn};

use crate::game::BotChannel;

/// Replies longer than this are replaced by an empty line (read as a wait).
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug)]
pub struct ProcessBridge {
    child: Child,
    outgoing: Option<Sender<String>>,
    incoming: Receiver<String>,
    kill_grace: Duration,
    source: Option<TempPath>,
    cleaned_up: bool,
}

impl ProcessBridge {
    pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

    /// Spawn `command` with piped stdin/stdout. The child's stderr is discarded unless
    /// `allow_stderr` is set, in which case it is inherited.
    ///
    /// On unix the child leads a new process group, so whatever it forks is stopped with it.
    #[instrument(skip(args, envs))]
    pub fn spawn(
        command: &str,
        args: &[String],
        envs: &[(String, String)],
        allow_stderr: bool,
    ) -> anyhow::Result<ProcessBridge> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped());
        cmd.stderr(if allow_stderr {
            Stdio::inherit()
        } else {
            Stdio::null()
        });
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd
            .spawn()
            .with_context(|| format!("command '{command}' not found"))?;

        let stdin = child.stdin.take().context("child has no stdin")?;
        let stdout = child.stdout.take().context("child has no stdout")?;

        let (tx_out, rx_out) = mpsc::channel();
        let (tx_in, rx_in) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("bot-stdin".into())
            .spawn(move || write_lines(stdin, rx_out))
            .and_then(|_| {
                thread::Builder::new()
                    .name("bot-stdout".into())
                    .spawn(move || read_lines(stdout, tx_in))
            });
        if let Err(e) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e).context("could not start bridge threads");
        }
        debug!(pid = child.id(), "bot process started");

        Ok(ProcessBridge {
            child,
            outgoing: Some(tx_out),
            incoming: rx_in,
            kill_grace: Self::DEFAULT_KILL_GRACE,
            source: None,
            cleaned_up: false,
        })
    }

    /// Keep a materialized source file alive until the bridge is shut down, then delete it.
    #[must_use]
    pub fn with_source(mut self, source: TempPath) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn with_kill_grace(mut self, kill_grace: Duration) -> Self {
        self.kill_grace = kill_grace;
        self
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Queue one line for the child. Never blocks and never fails: a dead child just stops
    /// consuming.
    ///
    /// Anything the child wrote before this call is discarded.
    pub fn send(&mut self, line: &str) {
        let mut dropped = 0;
        while self.incoming.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            trace!(dropped, "discarded unsolicited or late lines");
        }
        if let Some(tx) = &self.outgoing {
            if tx.send(line.to_owned()).is_err() {
                debug!("bot stdin closed, dropping outgoing messages");
                self.outgoing = None;
            }
        }
    }

    /// Wait up to `timeout` for the next reply.
    pub fn receive(&mut self, timeout: Duration) -> Option<String> {
        match self.incoming.recv_timeout(timeout) {
            Ok(line) => Some(line),
            Err(RecvTimeoutError::Timeout) => {
                trace!(?timeout, "no reply before deadline");
                None
            }
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Close the child's stdin, ask it to terminate, and kill it if it is still alive after the
    /// grace period. The materialized source file (if any) is removed afterwards.
    ///
    /// Safe to call more than once. Also run on drop.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        self.cleaned_up = true;
        // writer thread flushes what is queued, then drops stdin
        self.outgoing = None;

        let result = self.terminate();

        if let Some(source) = self.source.take() {
            if let Err(e) = source.close() {
                warn!("could not remove bot source file: {e}");
            }
        }
        result
    }

    fn terminate(&mut self) -> anyhow::Result<()> {
        if self.child.try_wait()?.is_some() {
            signal_group(&self.child, Signal::Kill);
            return Ok(());
        }
        signal_group(&self.child, Signal::Term);

        if wait_for_exit(&mut self.child, self.kill_grace)?.is_some() {
            signal_group(&self.child, Signal::Kill);
            return Ok(());
        }
        warn!(pid = self.child.id(), "bot ignored termination, killing it");
        signal_group(&self.child, Signal::Kill);
        self.child.kill().context("could not kill bot process")?;
        self.child.wait().context("could not reap bot process")?;
        Ok(())
    }
}

impl BotChannel for ProcessBridge {
    fn send(&mut self, line: &str) {
        ProcessBridge::send(self, line)
    }

    fn receive(&mut self, timeout: Duration) -> Option<String> {
        ProcessBridge::receive(self, timeout)
    }
}

impl Drop for ProcessBridge {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("bot cleanup failed: {e:#}");
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Signal {
    Term,
    Kill,
}

/// Signal every process in the group led by `child`, which must have been spawned with
/// `process_group(0)`. A no-op off unix, where only `Child::kill` on the child itself is left.
pub(crate) fn signal_group(child: &Child, signal: Signal) {
    #[cfg(unix)]
    {
        let signal = match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // SAFETY: the group id is the pid of a Child we still own. Until it is reaped neither
        // its pid nor its group id can be recycled; once it is, the group only holds its own
        // leftover descendants, or nothing and the call fails with ESRCH.
        let ret = unsafe { libc::killpg(child.id() as libc::pid_t, signal) };
        if ret != 0 {
            trace!(pid = child.id(), "process group already gone");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (child, signal);
    }
}

/// Poll until the child exits or `max_duration` elapses.
pub(crate) fn wait_for_exit(
    child: &mut Child,
    max_duration: Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let deadline = Instant::now() + max_duration;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(10).min(max_duration / 10));
    }
}

fn write_lines(mut stdin: ChildStdin, lines: Receiver<String>) {
    for line in lines {
        let written = stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush());
        if let Err(e) = written {
            // broken pipe: the bot exited or closed its stdin
            debug!("write to bot failed: {e}");
            return;
        }
    }
}

fn read_lines(stdout: ChildStdout, lines: Sender<String>) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut oversized = false;
    loop {
        buf.clear();
        let limit = (MAX_LINE_BYTES + 1) as u64;
        match (&mut reader).take(limit).read_until(b'\n', &mut buf) {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                debug!("read from bot failed: {e}");
                return;
            }
        }
        let complete = buf.last() == Some(&b'\n');
        if !complete && buf.len() > MAX_LINE_BYTES {
            oversized = true;
            continue;
        }
        let line = if oversized {
            oversized = false;
            String::new()
        } else {
            String::from_utf8_lossy(&buf)
                .trim_end_matches(['\n', '\r'])
                .to_string()
        };
        if lines.send(line).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessBridge {
        ProcessBridge::spawn("sh", &["-c".to_string(), script.to_string()], &[], false)
            .unwrap()
            .with_kill_grace(Duration::from_millis(200))
    }

    #[test]
    fn echoes_lines() {
        let mut bridge = sh("while read line; do echo \"got $line\"; done");
        bridge.send("one");
        assert_eq!(
            bridge.receive(Duration::from_secs(5)).as_deref(),
            Some("got one")
        );
        bridge.send("two");
        assert_eq!(
            bridge.receive(Duration::from_secs(5)).as_deref(),
            Some("got two")
        );
        bridge.shutdown().unwrap();
    }

    #[test]
    fn silent_child_times_out_quickly() {
        let mut bridge = sh("sleep 30");
        let start = Instant::now();
        assert_eq!(bridge.receive(Duration::from_millis(50)), None);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn late_reply_is_not_taken_for_the_next_one() {
        let mut bridge = sh("read a; sleep 0.3; echo late; read b; echo \"fresh $b\"");
        bridge.send("first");
        assert_eq!(bridge.receive(Duration::from_millis(50)), None);
        thread::sleep(Duration::from_millis(400));
        bridge.send("second");
        assert_eq!(
            bridge.receive(Duration::from_secs(5)).as_deref(),
            Some("fresh second")
        );
    }

    #[test]
    fn dead_child_does_not_break_send() {
        let mut bridge = sh("exit 0");
        thread::sleep(Duration::from_millis(100));
        for _ in 0..100 {
            bridge.send("anyone there?");
        }
        assert_eq!(bridge.receive(Duration::from_millis(100)), None);
        bridge.shutdown().unwrap();
    }

    #[test]
    fn stubborn_child_is_killed() {
        let mut bridge = sh("trap '' TERM; while true; do sleep 1; done");
        let start = Instant::now();
        bridge.shutdown().unwrap();
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(bridge.child.try_wait().unwrap().is_some());
    }

    /// Alive and not a zombie waiting to be reaped.
    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(") ")
                .map(|(_, rest)| !rest.starts_with(['Z', 'X']))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn forked_children_are_stopped_with_the_bot() {
        let mut bridge = sh("sleep 4242 & echo $!; wait");
        let pid: u32 = bridge
            .receive(Duration::from_secs(5))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(is_running(pid));
        bridge.shutdown().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while is_running(pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(!is_running(pid), "background child {pid} survived shutdown");
    }

    #[test]
    fn source_file_removed_on_shutdown() {
        let file = tempfile::Builder::new().suffix(".py").tempfile().unwrap();
        let path = file.path().to_path_buf();
        let mut bridge = sh("cat > /dev/null").with_source(file.into_temp_path());
        assert!(path.exists());
        bridge.shutdown().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn oversized_line_reads_as_empty() {
        let script = format!(
            "head -c {} /dev/zero | tr '\\0' 'a'; echo; echo ok",
            MAX_LINE_BYTES * 2
        );
        let mut bridge = sh(&script);
        assert_eq!(bridge.receive(Duration::from_secs(5)).as_deref(), Some(""));
        assert_eq!(bridge.receive(Duration::from_secs(5)).as_deref(), Some("ok"));
    }
}
