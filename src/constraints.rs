//! Resource and time limits for one sandboxed run.
//!
//! Limits come in three groups:
//!
//! - **Isolation**: memory cap, CPU share (a fraction of one core), process count, network.
//! - **Wall clock**: the whole run is killed once it exceeds this bound.
//! - **Reply deadlines**: how long the engine waits for the bot's name and for each action. A
//!   missed deadline never ends the run, the tick just resolves as a wait.
//!
//! The wall clock should comfortably exceed `handshake + tick timeout × ticks per run`;
//! [`ConstraintsBuilder::build`] warns when it does not.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use farm_arena::constraints::ConstraintsBuilder;
//!
//! let constraints = ConstraintsBuilder::new()
//!     .with_memory_mb(256)
//!     .with_cpu_fraction(0.5)
//!     .with_wall_clock(Duration::from_secs(60))
//!     .with_tick_timeout(Duration::from_millis(150))
//!     .build()
//!     .unwrap();
//! assert_eq!(constraints.memory_bytes(), 256 * 1024 * 1024);
//! ```

use std::{env, time::Duration};

use anyhow::bail;
use tracing::warn;

use crate::cgroup_manager::CgroupLimits;
use crate::game::{ReplyDeadlines, Rules};

/// Builder for [`Constraints`]. Every limit has a default, see the `DEFAULT_*` constants.
#[derive(Debug, Default, Clone)]
pub struct ConstraintsBuilder {
    memory_mb: Option<usize>,
    cpu_fraction: Option<f64>,
    pids_limit: Option<usize>,
    network: Option<bool>,
    wall_clock: Option<Duration>,
    tick_timeout: Option<Duration>,
    handshake_timeout: Option<Duration>,
    kill_grace: Option<Duration>,
}

impl ConstraintsBuilder {
    pub const DEFAULT_MEMORY_MB: usize = 256;
    pub const DEFAULT_CPU_FRACTION: f64 = 0.5;
    pub const DEFAULT_PIDS_LIMIT: usize = 64;
    pub const DEFAULT_WALL_CLOCK: Duration = Duration::from_secs(60);
    pub const DEFAULT_TICK_TIMEOUT: Duration = Duration::from_millis(150);
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);
    pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder configured from environment variables. Unset or unparsable variables keep the
    /// default.
    ///
    /// Read environment variables are:
    /// - `FARM_MEMORY_MB` (usize): memory cap in MiB
    /// - `FARM_CPU_FRACTION` (f64): share of one core, e.g. `0.5`
    /// - `FARM_PIDS_LIMIT` (usize): maximum number of processes
    /// - `FARM_ALLOW_NETWORK` (bool): give the environment network access
    /// - `FARM_WALL_CLOCK_SECS` (u64): bound on the whole run
    /// - `FARM_TICK_TIMEOUT_MS` (u64): deadline for each action
    /// - `FARM_HANDSHAKE_TIMEOUT_MS` (u64): deadline for the bot's name
    /// - `FARM_KILL_GRACE_MS` (u64): time a bot gets to exit before being killed
    #[must_use]
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(var: &str) -> Option<T> {
            env::var(var).ok()?.trim().parse().ok()
        }

        fn parse_millis(var: &str) -> Option<Duration> {
            parse::<u64>(var).map(Duration::from_millis)
        }

        ConstraintsBuilder {
            memory_mb: parse("FARM_MEMORY_MB"),
            cpu_fraction: parse("FARM_CPU_FRACTION"),
            pids_limit: parse("FARM_PIDS_LIMIT"),
            network: env::var("FARM_ALLOW_NETWORK")
                .ok()
                .map(|v| v.eq_ignore_ascii_case("true")),
            wall_clock: parse::<u64>("FARM_WALL_CLOCK_SECS").map(Duration::from_secs),
            tick_timeout: parse_millis("FARM_TICK_TIMEOUT_MS"),
            handshake_timeout: parse_millis("FARM_HANDSHAKE_TIMEOUT_MS"),
            kill_grace: parse_millis("FARM_KILL_GRACE_MS"),
        }
    }

    /// Memory cap in MiB.
    #[must_use]
    pub fn with_memory_mb(self, mb: usize) -> Self {
        Self {
            memory_mb: Some(mb),
            ..self
        }
    }

    /// CPU share as a fraction of one core (`0.5` is half a core).
    #[must_use]
    pub fn with_cpu_fraction(self, fraction: f64) -> Self {
        Self {
            cpu_fraction: Some(fraction),
            ..self
        }
    }

    #[must_use]
    pub fn with_pids_limit(self, pids: usize) -> Self {
        Self {
            pids_limit: Some(pids),
            ..self
        }
    }

    /// Network access is disabled unless this is set.
    #[must_use]
    pub fn with_network(self, allowed: bool) -> Self {
        Self {
            network: Some(allowed),
            ..self
        }
    }

    #[must_use]
    pub fn with_wall_clock(self, duration: Duration) -> Self {
        Self {
            wall_clock: Some(duration),
            ..self
        }
    }

    #[must_use]
    pub fn with_tick_timeout(self, duration: Duration) -> Self {
        Self {
            tick_timeout: Some(duration),
            ..self
        }
    }

    #[must_use]
    pub fn with_handshake_timeout(self, duration: Duration) -> Self {
        Self {
            handshake_timeout: Some(duration),
            ..self
        }
    }

    #[must_use]
    pub fn with_kill_grace(self, duration: Duration) -> Self {
        Self {
            kill_grace: Some(duration),
            ..self
        }
    }

    /// Consumes the builder and returns the constructed `Constraints`.
    ///
    /// # Errors
    ///
    /// Returns an error when the limits are impossible: zero memory or CPU, a CPU share larger
    /// than the machine, more memory than the machine has available, or zero timeouts.
    pub fn build(self) -> anyhow::Result<Constraints> {
        let memory_mb = self.memory_mb.unwrap_or(Self::DEFAULT_MEMORY_MB);
        let cpu_fraction = self.cpu_fraction.unwrap_or(Self::DEFAULT_CPU_FRACTION);
        let wall_clock = self.wall_clock.unwrap_or(Self::DEFAULT_WALL_CLOCK);
        let tick_timeout = self.tick_timeout.unwrap_or(Self::DEFAULT_TICK_TIMEOUT);
        let handshake_timeout = self
            .handshake_timeout
            .unwrap_or(Self::DEFAULT_HANDSHAKE_TIMEOUT);

        if memory_mb == 0 {
            bail!("memory cap must be positive");
        }
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        let available_mb = (sys.available_memory() / (1024 * 1024)) as usize;
        if available_mb > 0 && memory_mb > available_mb {
            bail!("memory cap ({memory_mb}MB) is greater than available memory ({available_mb}MB)");
        }

        let cores = num_cpus::get() as f64;
        if !(cpu_fraction > 0.0 && cpu_fraction <= cores) {
            bail!("cpu fraction must be in (0, {cores}], got {cpu_fraction}");
        }
        if wall_clock.is_zero() || tick_timeout.is_zero() || handshake_timeout.is_zero() {
            bail!("timeouts must be positive");
        }

        let rules = Rules::default();
        let worst_case =
            handshake_timeout + tick_timeout * rules.cycles * rules.ap_per_cycle;
        if wall_clock < worst_case {
            warn!(
                ?wall_clock,
                ?worst_case,
                "wall clock is shorter than a run of a bot that always times out"
            );
        }

        Ok(Constraints {
            memory_mb,
            cpu_fraction,
            pids_limit: self.pids_limit.unwrap_or(Self::DEFAULT_PIDS_LIMIT),
            network: self.network.unwrap_or(false),
            wall_clock,
            tick_timeout,
            handshake_timeout,
            kill_grace: self.kill_grace.unwrap_or(Self::DEFAULT_KILL_GRACE),
        })
    }
}

/// Obtained using [`ConstraintsBuilder`].
#[derive(Clone, Debug, PartialEq)]
pub struct Constraints {
    pub(crate) memory_mb: usize,
    pub(crate) cpu_fraction: f64,
    pub(crate) pids_limit: usize,
    pub(crate) network: bool,
    pub(crate) wall_clock: Duration,
    pub(crate) tick_timeout: Duration,
    pub(crate) handshake_timeout: Duration,
    pub(crate) kill_grace: Duration,
}

impl Constraints {
    const CPU_PERIOD_US: u64 = 100_000;

    pub fn builder() -> ConstraintsBuilder {
        ConstraintsBuilder::new()
    }

    pub fn memory_bytes(&self) -> i64 {
        self.memory_mb as i64 * 1024 * 1024
    }

    pub fn memory_mb(&self) -> usize {
        self.memory_mb
    }

    pub fn cpu_fraction(&self) -> f64 {
        self.cpu_fraction
    }

    pub fn pids_limit(&self) -> usize {
        self.pids_limit
    }

    pub fn network(&self) -> bool {
        self.network
    }

    pub fn wall_clock(&self) -> Duration {
        self.wall_clock
    }

    pub fn kill_grace(&self) -> Duration {
        self.kill_grace
    }

    pub fn reply_deadlines(&self) -> ReplyDeadlines {
        ReplyDeadlines {
            handshake: self.handshake_timeout,
            tick: self.tick_timeout,
        }
    }

    pub fn cgroup_limits(&self) -> CgroupLimits {
        CgroupLimits {
            max_memory: self.memory_bytes(),
            max_pids: self.pids_limit as i64,
            cpu_quota: (self.cpu_fraction * Self::CPU_PERIOD_US as f64) as i64,
            cpu_period: Self::CPU_PERIOD_US,
        }
    }

    /// Variables handed to the runner so that the engine inside the sandbox uses the same
    /// reply deadlines as the host configured.
    pub fn runner_env(&self) -> Vec<(String, String)> {
        vec![
            (
                "FARM_TICK_TIMEOUT_MS".to_string(),
                self.tick_timeout.as_millis().to_string(),
            ),
            (
                "FARM_HANDSHAKE_TIMEOUT_MS".to_string(),
                self.handshake_timeout.as_millis().to_string(),
            ),
            (
                "FARM_KILL_GRACE_MS".to_string(),
                self.kill_grace.as_millis().to_string(),
            ),
        ]
    }
}
