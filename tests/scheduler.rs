use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use base64::{prelude::BASE64_STANDARD, Engine as _};
use common::{init_test_logger, ScriptedBot};
use farm_arena::prelude::*;

mod common;

/// Interprets the "source" as a command instead of running anything.
///
/// - `score N`: a valid replay with final score N
/// - `sleep MS`: sleep, then a zero-score replay
/// - `panic`: panics inside the worker
/// - `fail`: launch failure
/// - `report`: the runner's error document
#[derive(Default)]
struct FakeSandbox {
    launches: AtomicUsize,
}

fn replay_document(score: f64) -> String {
    let rules = Rules::new().with_cycles(1).with_ap_per_cycle(1);
    let mut replay = Engine::new(rules, 0).run(&mut ScriptedBot::new("Fake", &[]));
    replay.final_score = score;
    replay.cycle_scores = vec![score];
    serde_json::to_string(&replay).unwrap()
}

impl Sandbox for FakeSandbox {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn ensure_image(&self) -> Result<(), SandboxError> {
        Ok(())
    }

    fn launch(&self, encoded_source: &str) -> Result<String, SandboxError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let source = String::from_utf8(BASE64_STANDARD.decode(encoded_source).unwrap()).unwrap();
        let mut words = source.split_whitespace();
        match (words.next(), words.next()) {
            (Some("score"), Some(n)) => Ok(replay_document(n.parse().unwrap())),
            (Some("sleep"), Some(ms)) => {
                thread::sleep(Duration::from_millis(ms.parse().unwrap()));
                Ok(replay_document(0.0))
            }
            (Some("panic"), _) => panic!("sandbox exploded"),
            (Some("fail"), _) => Err(SandboxError::Launch("no room".into())),
            (Some("report"), _) => Ok(r#"{"error": "Failed to start bot"}"#.into()),
            _ => Ok(String::new()),
        }
    }
}

fn start(workers: usize) -> (Arc<FakeSandbox>, JobScheduler) {
    init_test_logger();
    let sandbox = Arc::new(FakeSandbox::default());
    let config = Configuration::new().with_workers(workers);
    let scheduler = JobScheduler::start(sandbox.clone(), &config);
    (sandbox, scheduler)
}

fn submit(scheduler: &JobScheduler, name: &str, source: &str) -> JobId {
    scheduler
        .submit(name, Submission::Inline(source.to_string()))
        .unwrap()
}

const WAIT: Duration = Duration::from_secs(10);

#[test]
fn oversized_submission_never_becomes_a_job() {
    let (sandbox, scheduler) = start(2);
    let huge = "x".repeat(64 * 1024 + 1);
    assert_eq!(
        scheduler.submit("Huge", Submission::Inline(huge)),
        Err(SubmitError::TooLarge { limit: 65536 })
    );
    assert_eq!(
        scheduler.submit(
            "Upload",
            Submission::File {
                filename: "bot.txt".into(),
                bytes: b"score 1".to_vec()
            }
        ),
        Err(SubmitError::WrongExtension {
            expected: "py".into()
        })
    );
    assert!(scheduler.store().is_empty());
    scheduler.shutdown();
    assert_eq!(sandbox.launches.load(Ordering::SeqCst), 0);
}

#[test]
fn jobs_complete_or_fail_with_a_message() {
    let (_, scheduler) = start(2);
    let ok = submit(&scheduler, "Good", "score 750");
    let failed = submit(&scheduler, "Bad", "fail");
    let reported = submit(&scheduler, "Reported", "report");
    let empty = submit(&scheduler, "Empty", "nothing");

    let job = scheduler.wait(&ok, WAIT).unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.result.unwrap().final_score, 750.0);
    assert!(job.error.is_none());

    let job = scheduler.wait(&failed, WAIT).unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error.unwrap().contains("no room"));
    assert!(job.result.is_none());

    let job = scheduler.wait(&reported, WAIT).unwrap();
    assert_eq!(job.error.as_deref(), Some("Failed to start bot"));

    let job = scheduler.wait(&empty, WAIT).unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.error.as_deref(), Some("run produced no output"));
}

#[test]
fn submit_does_not_wait_for_execution() {
    let (_, scheduler) = start(1);
    let start = Instant::now();
    let slow = submit(&scheduler, "Slow", "sleep 500");
    let queued = submit(&scheduler, "Queued", "score 1");
    assert!(start.elapsed() < Duration::from_millis(400));

    let status = scheduler.get(&queued).unwrap().status;
    assert_eq!(status, JobStatus::Pending);
    assert!(!scheduler.get(&slow).unwrap().status.is_finished());

    assert_eq!(
        scheduler.wait(&queued, WAIT).unwrap().status,
        JobStatus::Complete
    );
}

#[test]
fn worker_survives_a_panicking_job() {
    let (_, scheduler) = start(1);
    let boom = submit(&scheduler, "Boom", "panic");
    let after = submit(&scheduler, "After", "score 10");

    let job = scheduler.wait(&boom, WAIT).unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error.unwrap().contains("sandbox exploded"));

    let job = scheduler.wait(&after, WAIT).unwrap();
    assert_eq!(job.status, JobStatus::Complete);
}

#[test]
fn leaderboard_ranks_completed_jobs() {
    let (_, scheduler) = start(3);
    let ids = [
        submit(&scheduler, "Third", "score 10"),
        submit(&scheduler, "First", "score 900"),
        submit(&scheduler, "Broken", "fail"),
        submit(&scheduler, "Second", "score 400"),
    ];
    for id in &ids {
        assert!(scheduler.wait(id, WAIT).unwrap().status.is_finished());
    }

    let board = scheduler.leaderboard();
    let names: Vec<_> = board.iter().map(|e| e.bot_name.as_str()).collect();
    assert_eq!(names, ["First", "Second", "Third"]);
    assert_eq!(board[0].rank, 1);
    assert_eq!(board[0].cycle_scores, vec![900.0]);
}

#[test]
fn shutdown_drains_queue_and_refuses_new_work() {
    let (sandbox, scheduler) = start(2);
    let ids: Vec<_> = (0..6)
        .map(|i| submit(&scheduler, &format!("Bot{i}"), "sleep 20"))
        .collect();
    scheduler.shutdown();
    for id in &ids {
        assert_eq!(scheduler.get(id).unwrap().status, JobStatus::Complete);
    }
    assert_eq!(sandbox.launches.load(Ordering::SeqCst), 6);
    assert_eq!(
        scheduler.submit("Late", Submission::Inline("score 1".into())),
        Err(SubmitError::Closed)
    );
}
