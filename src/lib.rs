//! # Farm Arena
//!
//! Runs untrusted, user-submitted farming bots in sandboxes against a deterministic
//! rice-farming simulation, then scores and records the result.
//!
//! It provides:
//! - The simulation itself, in [`game`]: grid generation, action resolution, the
//!   cycle/tick state machine and replay recording
//! - A line-based bridge to the bot process with per-message deadlines ([`bridge`])
//! - Sandboxes isolating one run each, with memory, CPU, network and wall-clock limits
//!   ([`sandbox`]): one container per run with docker, or a cgroup v2 on a bare Linux host
//! - A job scheduler dispatching submissions to a fixed pool of workers ([`scheduler`])
//!
//! # Documentation Overview
//!
//! - The wire protocol spoken by bots is described in [`game::protocol`].
//! - What happens inside the isolated environment is in [`runner`].
//! - Behavior flags are in [`Configuration`](crate::configuration::Configuration), resource and
//!   time limits in [`constraints`].
//!
//! # Usage Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use farm_arena::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::from_env();
//!     let constraints = ConstraintsBuilder::from_env()
//!         .with_wall_clock(Duration::from_secs(60))
//!         .build()?;
//!
//!     let sandbox = DockerSandbox::new(&config, constraints);
//!     sandbox.ensure_image()?;
//!
//!     let scheduler = JobScheduler::start(Arc::new(sandbox), &config);
//!     let job_id = scheduler.submit("Waiter", Submission::Inline("print('Waiter')".into()))?;
//!     let job = scheduler.wait(&job_id, Duration::from_secs(120));
//!     println!("{job:?}");
//!
//!     for entry in scheduler.leaderboard() {
//!         println!("{}. {} {}", entry.rank, entry.bot_name, entry.final_score);
//!     }
//!     Ok(())
//! }
//! ```

pub use anyhow;

pub mod bridge;
pub mod cgroup_manager;
pub mod configuration;
pub mod constraints;
pub mod error;
pub mod game;
pub mod job;
pub mod logger;
pub mod runner;
pub mod sandbox;
pub mod scheduler;

/// Commonly used types and traits for quick access.
///
/// ```rust
/// use farm_arena::prelude::*;
/// ```
pub mod prelude {
    pub use crate::configuration::Configuration;
    pub use crate::constraints::{Constraints, ConstraintsBuilder};
    pub use crate::error::{SandboxError, SubmitError};
    pub use crate::game::{Engine, Replay, Rules};
    pub use crate::job::{Job, JobId, JobStatus, LeaderboardEntry};
    pub use crate::sandbox::{DockerSandbox, LocalSandbox, Sandbox};
    pub use crate::scheduler::{JobScheduler, Submission};
}
