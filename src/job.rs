//! Job records and the shared index the scheduler's workers update.
//!
//! The index is the only structure several workers write to, so it sits behind a
//! [`RwLock`]; each job has its own [`Mutex`]. Neither lock is ever held while a sandbox runs.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::game::Replay;

/// Opaque short job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    fn generate() -> JobId {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);
        JobId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        JobId(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Error,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }
}

/// Serializes as the status view: the source is never exposed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub job_id: JobId,
    pub status: JobStatus,
    pub bot_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    pub result: Option<Replay>,
    pub error: Option<String>,
    #[serde(skip)]
    pub source: String,
    /// arrival order, breaks leaderboard ties
    #[serde(skip)]
    pub seq: u64,
}

impl Job {
    pub fn final_score(&self) -> Option<f64> {
        self.result.as_ref().map(|r| r.final_score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub job_id: JobId,
    pub bot_name: String,
    pub final_score: f64,
    pub cycle_scores: Vec<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}

#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<Job>>>>,
    next_seq: AtomicU64,
}

fn lock(job: &Mutex<Job>) -> MutexGuard<'_, Job> {
    // a worker that panicked mid-update leaves a readable job behind
    job.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl JobStore {
    pub fn new() -> JobStore {
        JobStore::default()
    }

    /// Insert a new `pending` job and return its id.
    pub fn create(&self, bot_name: String, source: String) -> JobId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut index = self.jobs.write().unwrap_or_else(|p| p.into_inner());
        let mut job_id = JobId::generate();
        while index.contains_key(&job_id) {
            job_id = JobId::generate();
        }
        let job = Job {
            job_id: job_id.clone(),
            status: JobStatus::Pending,
            bot_name,
            submitted_at: OffsetDateTime::now_utc(),
            result: None,
            error: None,
            source,
            seq,
        };
        index.insert(job_id.clone(), Arc::new(Mutex::new(job)));
        job_id
    }

    fn handle(&self, job_id: &JobId) -> Option<Arc<Mutex<Job>>> {
        let index = self.jobs.read().unwrap_or_else(|p| p.into_inner());
        index.get(job_id).cloned()
    }

    /// Snapshot of a job.
    pub fn get(&self, job_id: &JobId) -> Option<Job> {
        self.handle(job_id).map(|job| lock(&job).clone())
    }

    /// Mark the job `running` and hand out its source.
    pub fn start(&self, job_id: &JobId) -> Option<String> {
        let job = self.handle(job_id)?;
        let mut job = lock(&job);
        job.status = JobStatus::Running;
        Some(job.source.clone())
    }

    pub fn complete(&self, job_id: &JobId, replay: Replay) {
        if let Some(job) = self.handle(job_id) {
            let mut job = lock(&job);
            job.result = Some(replay);
            job.error = None;
            job.status = JobStatus::Complete;
        }
    }

    pub fn fail(&self, job_id: &JobId, error: String) {
        if let Some(job) = self.handle(job_id) {
            let mut job = lock(&job);
            job.result = None;
            job.error = Some(error);
            job.status = JobStatus::Error;
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Completed jobs, best score first; equal scores keep arrival order.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let handles: Vec<_> = {
            let index = self.jobs.read().unwrap_or_else(|p| p.into_inner());
            index.values().cloned().collect()
        };
        let mut ranked: Vec<(u64, Job)> = handles
            .iter()
            .map(|job| lock(job).clone())
            .filter(|job| job.status == JobStatus::Complete && job.result.is_some())
            .map(|job| (job.seq, job))
            .collect();
        ranked.sort_by(|(seq_a, a), (seq_b, b)| {
            let (score_a, score_b) = (a.final_score().unwrap_or(0.0), b.final_score().unwrap_or(0.0));
            score_b.total_cmp(&score_a).then(seq_a.cmp(seq_b))
        });

        ranked
            .into_iter()
            .enumerate()
            .filter_map(|(i, (_, job))| {
                let replay = job.result?;
                Some(LeaderboardEntry {
                    rank: i + 1,
                    job_id: job.job_id,
                    bot_name: job.bot_name,
                    final_score: replay.final_score,
                    cycle_scores: replay.cycle_scores,
                    submitted_at: job.submitted_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{BotChannel, Engine, Rules};

    struct Silent;

    impl BotChannel for Silent {
        fn send(&mut self, _line: &str) {}

        fn receive(&mut self, _timeout: std::time::Duration) -> Option<String> {
            None
        }
    }

    fn replay_with_score(score: f64) -> Replay {
        let mut replay = Engine::new(Rules::new().with_cycles(1).with_ap_per_cycle(1), 0).run(&mut Silent);
        replay.final_score = score;
        replay.cycle_scores = vec![score];
        replay
    }

    #[test]
    fn ids_are_short_and_unique() {
        let store = JobStore::new();
        let a = store.create("a".into(), String::new());
        let b = store.create("b".into(), String::new());
        assert_eq!(a.as_str().len(), 8);
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn lifecycle() {
        let store = JobStore::new();
        let id = store.create("bot".into(), "print('hi')".into());
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Pending);
        assert_eq!(store.start(&id).as_deref(), Some("print('hi')"));
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Running);
        store.fail(&id, "boom".into());
        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(store.get(&JobId::from("missing")).is_none());
    }

    #[test]
    fn status_view_hides_source() {
        let store = JobStore::new();
        let id = store.create("bot".into(), "secret".into());
        let view = serde_json::to_value(store.get(&id).unwrap()).unwrap();
        assert_eq!(view["status"], "pending");
        assert_eq!(view["job_id"], id.as_str());
        assert!(view.get("source").is_none());
        assert!(view["submitted_at"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn leaderboard_orders_by_score_then_arrival() {
        let store = JobStore::new();
        let low = store.create("low".into(), String::new());
        let first_tie = store.create("first".into(), String::new());
        let pending = store.create("pending".into(), String::new());
        let second_tie = store.create("second".into(), String::new());
        let failed = store.create("failed".into(), String::new());

        store.complete(&second_tie, replay_with_score(500.0));
        store.complete(&low, replay_with_score(100.0));
        store.complete(&first_tie, replay_with_score(500.0));
        store.fail(&failed, "nope".into());

        let board = store.leaderboard();
        let names: Vec<_> = board.iter().map(|e| e.bot_name.as_str()).collect();
        assert_eq!(names, ["first", "second", "low"]);
        assert_eq!(board.iter().map(|e| e.rank).collect::<Vec<_>>(), [1, 2, 3]);
        assert!(board.iter().all(|e| e.job_id != pending));
    }
}
