use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tempfile::TempDir;

use autopost_core::browser::BrowserError;
use autopost_core::{
    CancelFlag, ErrorCategory, ErrorLog, ErrorLogFilter, JobStatus, JobTracker, Listing,
    ListingPoster, ListingSelection, ListingStatus, ListingStore, NewListing,
    PostAttemptFailure, PostingError, PostingOrchestrator, RetrySection, RunRequest,
    SessionCookie, SessionRecord, SessionSection, SessionStore, StorageState,
};

const ACCOUNT: &str = "seller@example.com";

struct Harness {
    _dir: TempDir,
    listings: ListingStore,
    jobs: JobTracker,
    errors: Arc<ErrorLog>,
    sessions: SessionStore,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
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
        Self {
            _dir: dir,
            listings,
            jobs,
            errors,
            sessions,
        }
    }

    fn save_session(&self) {
        self.sessions
            .persist(&SessionRecord {
                account_id: ACCOUNT.to_string(),
                saved_at: Utc::now(),
                state: StorageState {
                    cookies: vec![SessionCookie {
                        name: "c_user".into(),
                        value: "100012345".into(),
                        domain: ".example.com".into(),
                        path: "/".into(),
                        expires: 1_900_000_000.0,
                        http_only: true,
                        secure: true,
                        same_site: Some("Lax".into()),
                    }],
                    local_storage: BTreeMap::new(),
                },
            })
            .unwrap();
    }

    fn submit(&self, title: &str) -> i64 {
        self.listings
            .submit(&NewListing {
                account_id: ACCOUNT.into(),
                title: title.into(),
                description: "Solid teak, reupholstered.".into(),
                price: 120.0,
                image_path: None,
                scheduled_at: Utc::now() - Duration::minutes(5),
            })
            .unwrap()
    }

    fn orchestrator(&self, poster: Arc<dyn ListingPoster>) -> PostingOrchestrator {
        PostingOrchestrator::new(
            self.listings.clone(),
            self.jobs.clone(),
            Arc::clone(&self.errors),
            self.sessions.clone(),
            poster,
            RetrySection {
                auto_requeue: false,
                max_attempts: 3,
            },
        )
    }
}

type Behavior = Box<dyn Fn(&Listing) -> Result<(), PostAttemptFailure> + Send + Sync>;

struct MockPoster {
    calls: Mutex<Vec<i64>>,
    behavior: Behavior,
}

impl MockPoster {
    fn ok() -> Self {
        Self::with(Box::new(|_| Ok(())))
    }

    fn with(behavior: Behavior) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            behavior,
        }
    }

    fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ListingPoster for MockPoster {
    async fn post(
        &self,
        _session: &SessionRecord,
        listing: &Listing,
    ) -> Result<(), PostAttemptFailure> {
        self.calls.lock().unwrap().push(listing.id);
        (self.behavior)(listing)
    }
}

fn run_request(job_id: &str) -> RunRequest {
    RunRequest {
        job_id: job_id.into(),
        selection: ListingSelection::Due,
        include_failed: false,
    }
}

#[tokio::test]
async fn single_listing_posts_cleanly() {
    let harness = Harness::new();
    harness.save_session();
    let id = harness.submit("Mid-century armchair");

    let poster = Arc::new(MockPoster::ok());
    let orchestrator = harness.orchestrator(poster.clone());
    let snapshot = orchestrator
        .run(&run_request("job-a"), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(
        (snapshot.total, snapshot.completed, snapshot.failed),
        (1, 1, 0)
    );
    assert_eq!(harness.listings.get(id).unwrap().status, ListingStatus::Posted);
    assert_eq!(poster.calls(), vec![id]);
    assert!(harness
        .errors
        .list(&ErrorLogFilter::default())
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn field_not_found_fails_listing_but_finishes_job() {
    let harness = Harness::new();
    harness.save_session();
    let id = harness.submit("Mid-century armchair");

    let poster = Arc::new(MockPoster::with(Box::new(|_| {
        Err(PostAttemptFailure {
            error: PostingError::Browser(BrowserError::FieldNotFound("price".into())),
            screenshot: None,
        })
    })));
    let orchestrator = harness.orchestrator(poster);
    let snapshot = orchestrator
        .run(&run_request("job-b"), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(
        (snapshot.total, snapshot.completed, snapshot.failed),
        (1, 0, 1)
    );
    assert_eq!(
        snapshot.error_message.as_deref(),
        Some("1 of 1 listings failed")
    );

    let listing = harness.listings.get(id).unwrap();
    assert_eq!(listing.status, ListingStatus::Failed);
    assert_eq!(listing.retry_count, 1);
    assert!(listing.error_message.unwrap().contains("price"));

    let entries = harness.errors.list(&ErrorLogFilter::default()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].listing_id, id);
    // classified from message text; nothing matches a known keyword
    assert_eq!(entries[0].category, ErrorCategory::Unknown);
    assert!(entries[0].message.contains("price"));
}

#[tokio::test]
async fn missing_session_fails_without_opening_a_browser() {
    let harness = Harness::new();
    // no session saved
    let id = harness.submit("Mid-century armchair");

    let poster = Arc::new(MockPoster::ok());
    let orchestrator = harness.orchestrator(poster.clone());
    let snapshot = orchestrator
        .run(&run_request("job-c"), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(
        (snapshot.total, snapshot.completed, snapshot.failed),
        (1, 0, 1)
    );
    // the poster was never invoked
    assert!(poster.calls().is_empty());

    let listing = harness.listings.get(id).unwrap();
    assert_eq!(listing.status, ListingStatus::Failed);
    assert_eq!(listing.retry_count, 1);

    let entries = harness.errors.list(&ErrorLogFilter::default()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].category, ErrorCategory::SessionMissing);
}

#[tokio::test]
async fn session_invalidated_between_listings_splits_the_job() {
    let harness = Harness::new();
    harness.save_session();
    let first = harness.submit("First armchair");
    let second = harness.submit("Second armchair");

    // the session disappears after the first successful attempt
    let sessions = harness.sessions.clone();
    let poster = Arc::new(MockPoster::with(Box::new(move |_listing| {
        sessions.invalidate(ACCOUNT).unwrap();
        Ok(())
    })));
    let orchestrator = harness.orchestrator(poster.clone());
    let snapshot = orchestrator
        .run(&run_request("job-d"), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(
        (snapshot.total, snapshot.completed, snapshot.failed),
        (2, 1, 1)
    );
    assert_eq!(poster.calls(), vec![first]);
    assert_eq!(harness.listings.get(first).unwrap().status, ListingStatus::Posted);

    let failed = harness.listings.get(second).unwrap();
    assert_eq!(failed.status, ListingStatus::Failed);
    let entries = harness
        .errors
        .list(&ErrorLogFilter {
            listing_id: Some(second),
            category: None,
            limit: None,
        })
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].category, ErrorCategory::SessionMissing);
}

#[tokio::test]
async fn cancellation_takes_effect_between_listings() {
    let harness = Harness::new();
    harness.save_session();
    harness.submit("Never attempted");
    harness.submit("Never attempted either");

    let cancel = CancelFlag::new();
    cancel.cancel();
    let poster = Arc::new(MockPoster::ok());
    let orchestrator = harness.orchestrator(poster.clone());
    let snapshot = orchestrator
        .run(&run_request("job-e"), &cancel)
        .await
        .unwrap();

    // nothing ran, counters stayed truthful, the job still finalized
    assert!(poster.calls().is_empty());
    assert_eq!(snapshot.total, 2);
    assert_eq!(snapshot.completed + snapshot.failed, 0);
    assert!(snapshot.completed_at.is_some());
}
