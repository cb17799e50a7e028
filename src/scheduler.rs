//! Submission intake and the worker pool.
//!
//! [`JobScheduler::submit`] validates, records a `pending` job and queues its id; it never
//! waits on execution. A fixed number of worker threads take ids from the shared FIFO queue,
//! run them through the [`Sandbox`] and store the outcome. A panic while running one job is
//! recorded as that job's error and the worker moves on to the next one.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use crate::configuration::Configuration;
use crate::error::SubmitError;
use crate::game::Rules;
use crate::job::{Job, JobId, JobStore, LeaderboardEntry};
use crate::sandbox::Sandbox;

pub const UNNAMED_BOT: &str = "UnnamedBot";

/// Bot source as received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Inline(String),
    File { filename: String, bytes: Vec<u8> },
}

/// Limits checked before a job is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPolicy {
    pub max_source_bytes: usize,
    pub source_extension: String,
}

impl SubmissionPolicy {
    pub fn from_config(config: &Configuration) -> SubmissionPolicy {
        SubmissionPolicy {
            max_source_bytes: config.max_source_bytes(),
            source_extension: config.source_extension().to_string(),
        }
    }

    /// Normalized `(bot name, source)`.
    ///
    /// # Errors
    ///
    /// Missing or empty source, source over the size cap, or a file with the wrong extension.
    pub fn validate(
        &self,
        name: &str,
        submission: Submission,
    ) -> Result<(String, String), SubmitError> {
        let source = match submission {
            Submission::Inline(code) => {
                if code.len() > self.max_source_bytes {
                    return Err(SubmitError::TooLarge {
                        limit: self.max_source_bytes,
                    });
                }
                code
            }
            Submission::File { filename, bytes } => {
                let extension_ok = Path::new(&filename)
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.source_extension));
                if !extension_ok {
                    return Err(SubmitError::WrongExtension {
                        expected: self.source_extension.clone(),
                    });
                }
                if bytes.len() > self.max_source_bytes {
                    return Err(SubmitError::TooLarge {
                        limit: self.max_source_bytes,
                    });
                }
                String::from_utf8_lossy(&bytes).into_owned()
            }
        };
        if source.trim().is_empty() {
            return Err(SubmitError::MissingContent);
        }
        Ok((normalize_name(name), source))
    }
}

fn normalize_name(name: &str) -> String {
    let name: String = name.trim().chars().take(Rules::MAX_NAME_LEN).collect();
    if name.is_empty() {
        UNNAMED_BOT.to_string()
    } else {
        name
    }
}

pub struct JobScheduler {
    store: Arc<JobStore>,
    policy: SubmissionPolicy,
    queue: Mutex<Option<Sender<JobId>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Start `config.workers()` workers sharing `sandbox`.
    pub fn start(sandbox: Arc<dyn Sandbox>, config: &Configuration) -> JobScheduler {
        let store = Arc::new(JobStore::new());
        let (tx, rx) = mpsc::channel();
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..config.workers())
            .filter_map(|i| {
                let (rx, store, sandbox) = (rx.clone(), store.clone(), sandbox.clone());
                thread::Builder::new()
                    .name(format!("farm-worker-{i}"))
                    .spawn(move || worker_loop(&rx, &store, sandbox.as_ref()))
                    .inspect_err(|e| error!("could not start worker {i}: {e}"))
                    .ok()
            })
            .collect::<Vec<_>>();
        info!(workers = workers.len(), sandbox = sandbox.name(), "scheduler started");

        JobScheduler {
            store,
            policy: SubmissionPolicy::from_config(config),
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    /// Validate and queue a submission. Returns as soon as the job is recorded.
    ///
    /// # Errors
    ///
    /// See [`SubmissionPolicy::validate`]; [`SubmitError::Closed`] after [`Self::shutdown`].
    #[instrument(skip(self, submission))]
    pub fn submit(&self, name: &str, submission: Submission) -> Result<JobId, SubmitError> {
        let (bot_name, source) = self.policy.validate(name, submission)?;
        let queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        let Some(tx) = queue.as_ref() else {
            return Err(SubmitError::Closed);
        };
        let job_id = self.store.create(bot_name, source);
        if tx.send(job_id.clone()).is_err() {
            // every worker is gone
            self.store.fail(&job_id, "no worker available".to_string());
        }
        info!(%job_id, "job queued");
        Ok(job_id)
    }

    pub fn get(&self, job_id: &JobId) -> Option<Job> {
        self.store.get(job_id)
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        self.store.leaderboard()
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Poll until the job is `complete` or `error`, or `timeout` elapses. Returns the last seen
    /// state.
    pub fn wait(&self, job_id: &JobId, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self.store.get(job_id)?;
            if job.status.is_finished() || Instant::now() >= deadline {
                return Some(job);
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    /// Stop accepting jobs, let workers drain the queue, and join them.
    pub fn shutdown(&self) {
        self.queue.lock().unwrap_or_else(|p| p.into_inner()).take();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|p| p.into_inner()));
        for worker in workers {
            if worker.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        debug!("scheduler stopped");
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(queue: &Mutex<Receiver<JobId>>, store: &JobStore, sandbox: &dyn Sandbox) {
    loop {
        let next = queue.lock().unwrap_or_else(|p| p.into_inner()).recv();
        let Ok(job_id) = next else {
            return;
        };
        run_job(&job_id, store, sandbox);
    }
}

#[instrument(skip(store, sandbox))]
fn run_job(job_id: &JobId, store: &JobStore, sandbox: &dyn Sandbox) {
    let Some(source) = store.start(job_id) else {
        warn!("queued job vanished");
        return;
    };
    info!("job running");

    match catch_unwind(AssertUnwindSafe(|| sandbox.run(&source))) {
        Ok(Ok(replay)) => {
            info!(final_score = replay.final_score, "job complete");
            store.complete(job_id, replay);
        }
        Ok(Err(e)) => {
            error!("job failed: {e}");
            store.fail(job_id, e.to_string());
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("worker panicked: {message}");
            store.fail(job_id, format!("internal error: {message}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SubmissionPolicy {
        SubmissionPolicy::from_config(&Configuration::new().with_max_source_bytes(16))
    }

    #[test]
    fn names_are_normalized() {
        let (name, _) = policy()
            .validate("   ", Submission::Inline("x = 1".into()))
            .unwrap();
        assert_eq!(name, UNNAMED_BOT);
        let long = "n".repeat(100);
        let (name, _) = policy()
            .validate(&long, Submission::Inline("x = 1".into()))
            .unwrap();
        assert_eq!(name.len(), 64);
    }

    #[test]
    fn rejects_bad_submissions() {
        let p = policy();
        assert_eq!(
            p.validate("a", Submission::Inline(" \n".into())),
            Err(SubmitError::MissingContent)
        );
        assert_eq!(
            p.validate("a", Submission::Inline("x".repeat(17))),
            Err(SubmitError::TooLarge { limit: 16 })
        );
        assert_eq!(
            p.validate(
                "a",
                Submission::File {
                    filename: "bot.js".into(),
                    bytes: b"x".to_vec()
                }
            ),
            Err(SubmitError::WrongExtension {
                expected: "py".into()
            })
        );
        assert_eq!(
            p.validate(
                "a",
                Submission::File {
                    filename: "bot.py".into(),
                    bytes: vec![b'x'; 17]
                }
            ),
            Err(SubmitError::TooLarge { limit: 16 })
        );
    }

    #[test]
    fn file_bytes_are_decoded_lossily() {
        let (_, source) = policy()
            .validate(
                "a",
                Submission::File {
                    filename: "BOT.PY".into(),
                    bytes: vec![b'a', 0xff, b'b'],
                },
            )
            .unwrap();
        assert_eq!(source, "a\u{fffd}b");
    }
}
