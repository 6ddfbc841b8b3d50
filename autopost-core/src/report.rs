use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::config::StreamSection;
use crate::job::{JobError, JobSnapshot, JobTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The job reached a terminal status.
    Finished,
    /// The maximum stream duration elapsed first. Not an error.
    Timeout,
    /// No job exists under the requested id.
    NotFound,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    Snapshot(JobSnapshot),
    Closed { reason: CloseReason },
}

/// Exposes job state to external callers: one-shot snapshots on demand,
/// plus a bounded push stream that follows a job until it goes terminal.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    jobs: JobTracker,
    config: StreamSection,
}

impl StatusReporter {
    pub fn new(jobs: JobTracker, config: StreamSection) -> Self {
        Self { jobs, config }
    }

    pub fn snapshot(&self, job_id: &str) -> Result<JobSnapshot, JobError> {
        self.jobs.snapshot(job_id)
    }

    /// Polls the job and pushes a snapshot whenever progress moved, on every
    /// heartbeat, and once more on the terminal transition. The stream ends
    /// with exactly one `Closed` event, whatever happens.
    pub fn subscribe(&self, job_id: &str) -> ReceiverStream<StatusEvent> {
        let jobs = self.jobs.clone();
        let config = self.config.clone();
        let job_id = job_id.to_string();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let poll = Duration::from_millis(config.poll_interval_ms.max(10));
            let max_ticks =
                (config.max_duration_seconds.saturating_mul(1000) / poll.as_millis() as u64).max(1);
            let heartbeat_every = config.heartbeat_ticks.max(1) as u64;
            let mut last_processed: i64 = -1;
            let mut reason = CloseReason::Timeout;

            for tick in 0..max_ticks {
                let snapshot = match jobs.snapshot(&job_id) {
                    Ok(snapshot) => snapshot,
                    Err(JobError::NotFound(_)) => {
                        reason = CloseReason::NotFound;
                        break;
                    }
                    Err(err) => {
                        warn!(job = %job_id, error = %err, "status poll failed");
                        reason = CloseReason::NotFound;
                        break;
                    }
                };
                let processed = snapshot.completed + snapshot.failed;
                let terminal = snapshot.status.is_terminal();
                let heartbeat = tick % heartbeat_every == 0;
                if processed != last_processed || heartbeat || terminal {
                    last_processed = processed;
                    if tx.send(StatusEvent::Snapshot(snapshot)).await.is_err() {
                        return;
                    }
                }
                if terminal {
                    reason = CloseReason::Finished;
                    break;
                }
                sleep(poll).await;
            }

            let _ = tx.send(StatusEvent::Closed { reason }).await;
        });

        ReceiverStream::new(rx)
    }
}
