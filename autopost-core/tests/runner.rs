use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use autopost_core::{
    ErrorLog, JobError, JobTracker, Listing, ListingPoster, ListingSelection, ListingStore,
    PostAttemptFailure, PostingOrchestrator, PostingRunner, RetrySection, SessionRecord,
    SessionSection, SessionStore,
};

struct NoopPoster;

#[async_trait]
impl ListingPoster for NoopPoster {
    async fn post(
        &self,
        _session: &SessionRecord,
        _listing: &Listing,
    ) -> Result<(), PostAttemptFailure> {
        Ok(())
    }
}

fn orchestrator(dir: &TempDir) -> PostingOrchestrator {
    let db = dir.path().join("autopost.sqlite");
    let listings = ListingStore::builder().path(&db).build().unwrap();
    listings.initialize().unwrap();
    let jobs = JobTracker::new(&db).unwrap();
    jobs.initialize().unwrap();
    let errors = Arc::new(ErrorLog::new(&db, dir.path().join("failures.jsonl")).unwrap());
    let sessions_dir = dir.path().join("sessions");
    let sessions = SessionStore::new(
        &sessions_dir,
        "https://example.com/login",
        SessionSection {
            dir: sessions_dir.to_string_lossy().to_string(),
            auth_cookie: "c_user".into(),
            login_wait_seconds: 60,
            login_poll_interval_ms: 1000,
        },
    );
    PostingOrchestrator::new(
        listings,
        jobs,
        errors,
        sessions,
        Arc::new(NoopPoster),
        RetrySection {
            auto_requeue: false,
            max_attempts: 3,
        },
    )
}

#[tokio::test]
async fn submit_returns_immediately_and_worker_finalizes_the_job() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("autopost.sqlite");
    let runner = PostingRunner::new(Arc::new(orchestrator(&dir)));

    let job_id = runner.submit(ListingSelection::Due, false, None);
    assert!(!job_id.is_empty());

    // the job record appears once the worker picks the run up
    let jobs = JobTracker::new(&db).unwrap();
    let mut snapshot = None;
    for _ in 0..200 {
        match jobs.snapshot(&job_id) {
            Ok(found) if found.status.is_terminal() => {
                snapshot = Some(found);
                break;
            }
            Ok(_) | Err(JobError::NotFound(_)) => {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(err) => panic!("unexpected tracker error: {err}"),
        }
    }
    let snapshot = snapshot.expect("job should reach a terminal state");
    assert_eq!(snapshot.total, 0);
    assert!(snapshot.completed_at.is_some());

    runner.shutdown().await;
}

#[tokio::test]
async fn cancelling_unknown_job_reports_false() {
    let dir = TempDir::new().unwrap();
    let runner = PostingRunner::new(Arc::new(orchestrator(&dir)));
    assert!(!runner.cancel("no-such-job"));

    let job_id = runner.submit(ListingSelection::Ids(Vec::new()), false, Some("tagged".into()));
    assert_eq!(job_id, "tagged");

    runner.shutdown().await;
}
