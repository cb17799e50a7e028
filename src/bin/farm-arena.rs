//! Evaluate bot files through the job scheduler and print the leaderboard.
//!
//! `farm-arena [--local] <bot file>...`
//!
//! Jobs run in docker containers unless `--local` is given, in which case they run as cgroup
//! confined processes (see `FARM_ALLOW_UNCONTAINED`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use farm_arena::logger::{init_logger, LogTarget};
use farm_arena::prelude::*;
use tracing::warn;

fn main() -> anyhow::Result<()> {
    let config = Configuration::from_env();
    init_logger(if config.log() {
        LogTarget::File
    } else {
        LogTarget::Stderr
    })?;
    let constraints = ConstraintsBuilder::from_env().build()?;
    let wall_clock = constraints.wall_clock();

    let mut local = false;
    let mut files = vec![];
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--local" => local = true,
            flag if flag.starts_with("--") => bail!("unknown option {flag}"),
            _ => files.push(arg),
        }
    }
    if files.is_empty() {
        bail!("usage: farm-arena [--local] <bot file>...");
    }

    let sandbox: Arc<dyn Sandbox> = if local {
        Arc::new(LocalSandbox::new(&config, constraints)?)
    } else {
        Arc::new(DockerSandbox::new(&config, constraints))
    };
    sandbox.ensure_image()?;
    let scheduler = JobScheduler::start(sandbox, &config);

    let mut jobs = vec![];
    for file in &files {
        let bytes = std::fs::read(file).with_context(|| format!("could not read {file}"))?;
        let name = std::path::Path::new(file)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let submission = Submission::File {
            filename: file.clone(),
            bytes,
        };
        match scheduler.submit(&name, submission) {
            Ok(job_id) => {
                println!("{file}: job {job_id}");
                jobs.push(job_id);
            }
            Err(e) => println!("{file}: rejected ({e})"),
        }
    }

    // queued jobs wait for a free worker before their own wall clock starts
    let rounds = jobs.len().div_ceil(config.workers()) as u32 + 1;
    for job_id in &jobs {
        match scheduler.wait(job_id, wall_clock * rounds) {
            Some(job) if job.status == JobStatus::Error => println!(
                "{job_id} ({}): error: {}",
                job.bot_name,
                job.error.unwrap_or_default()
            ),
            Some(job) if !job.status.is_finished() => {
                warn!(%job_id, "job still {:?}", job.status)
            }
            _ => {}
        }
    }

    println!();
    println!("{:<5} {:<10} {:<32} {:>10}", "Rank", "Job", "Bot", "Score");
    for entry in scheduler.leaderboard() {
        println!(
            "{:<5} {:<10} {:<32} {:>10.1}",
            entry.rank,
            entry.job_id.as_str(),
            entry.bot_name,
            entry.final_score
        );
    }
    scheduler.shutdown();
    Ok(())
}
