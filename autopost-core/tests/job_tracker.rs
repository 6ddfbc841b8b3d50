use tempfile::TempDir;
use autopost_core::{JobError, JobStatus, JobTracker};

fn tracker(dir: &TempDir) -> JobTracker {
    let tracker = JobTracker::new(dir.path().join("autopost.sqlite")).unwrap();
    tracker.initialize().unwrap();
    tracker
}

#[test]
fn counters_stay_within_total() {
    let dir = TempDir::new().unwrap();
    let jobs = tracker(&dir);
    jobs.start("job-1", 2).unwrap();

    jobs.record_success("job-1").unwrap();
    jobs.record_failure("job-1").unwrap();

    // a third increment would break completed + failed <= total
    assert!(matches!(
        jobs.record_success("job-1"),
        Err(JobError::CounterExceeded(_))
    ));

    let snapshot = jobs.snapshot("job-1").unwrap();
    assert_eq!(snapshot.total, 2);
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.progress_percentage, 100);
}

#[test]
fn finish_stamps_outcome_and_summary() {
    let dir = TempDir::new().unwrap();
    let jobs = tracker(&dir);

    jobs.start("clean", 1).unwrap();
    jobs.record_progress("clean", 42, "Armchair").unwrap();
    let running = jobs.snapshot("clean").unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(running.current_listing_id, Some(42));
    assert_eq!(running.current_listing_title.as_deref(), Some("Armchair"));
    assert!(running.completed_at.is_none());

    jobs.record_success("clean").unwrap();
    let finished = jobs.finish("clean").unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.error_message, None);
    assert_eq!(finished.current_listing_id, None);
    assert!(finished.completed_at.is_some());

    jobs.start("dirty", 3).unwrap();
    jobs.record_success("dirty").unwrap();
    jobs.record_failure("dirty").unwrap();
    jobs.record_failure("dirty").unwrap();
    let finished = jobs.finish("dirty").unwrap();
    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(
        finished.error_message.as_deref(),
        Some("2 of 3 listings failed")
    );
}

#[test]
fn unknown_job_is_reported_as_such() {
    let dir = TempDir::new().unwrap();
    let jobs = tracker(&dir);
    assert!(matches!(
        jobs.snapshot("ghost"),
        Err(JobError::NotFound(id)) if id == "ghost"
    ));
    assert!(matches!(
        jobs.record_success("ghost"),
        Err(JobError::NotFound(_))
    ));
}

#[test]
fn progress_percentage_counts_processed_listings() {
    let dir = TempDir::new().unwrap();
    let jobs = tracker(&dir);
    jobs.start("job", 4).unwrap();
    assert_eq!(jobs.snapshot("job").unwrap().progress_percentage, 0);

    jobs.record_success("job").unwrap();
    assert_eq!(jobs.snapshot("job").unwrap().progress_percentage, 25);

    jobs.record_failure("job").unwrap();
    assert_eq!(jobs.snapshot("job").unwrap().progress_percentage, 50);
}
