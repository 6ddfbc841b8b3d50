use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::job::generate_job_id;
use crate::orchestrator::{CancelFlag, ListingSelection, PostingOrchestrator, RunRequest};

/// Owns the background execution of posting runs: submitting returns a job
/// id immediately, a single worker drains the queue one run at a time, and
/// all progress is communicated through the job tracker. The job record
/// appears once the worker picks the run up; callers observe it through
/// the status reporter.
pub struct PostingRunner {
    tx: Option<mpsc::UnboundedSender<RunRequest>>,
    cancels: Arc<Mutex<HashMap<String, CancelFlag>>>,
    worker: Option<JoinHandle<()>>,
}

impl PostingRunner {
    pub fn new(orchestrator: Arc<PostingOrchestrator>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<RunRequest>();
        let cancels: Arc<Mutex<HashMap<String, CancelFlag>>> = Arc::default();
        let worker_cancels = Arc::clone(&cancels);

        let worker = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let cancel = worker_cancels
                    .lock()
                    .unwrap()
                    .get(&request.job_id)
                    .cloned()
                    .unwrap_or_default();
                if let Err(err) = orchestrator.run(&request, &cancel).await {
                    error!(job = %request.job_id, error = %err, "posting run aborted");
                }
                worker_cancels.lock().unwrap().remove(&request.job_id);
            }
        });

        Self {
            tx: Some(tx),
            cancels,
            worker: Some(worker),
        }
    }

    /// Enqueues a run and returns its job id without waiting for execution.
    pub fn submit(
        &self,
        selection: ListingSelection,
        include_failed: bool,
        job_id: Option<String>,
    ) -> String {
        let job_id = job_id.unwrap_or_else(generate_job_id);
        self.cancels
            .lock()
            .unwrap()
            .insert(job_id.clone(), CancelFlag::new());
        let request = RunRequest {
            job_id: job_id.clone(),
            selection,
            include_failed,
        };
        let delivered = self
            .tx
            .as_ref()
            .map(|tx| tx.send(request).is_ok())
            .unwrap_or(false);
        if delivered {
            info!(job = %job_id, "posting run submitted");
        } else {
            warn!(job = %job_id, "runner worker is gone, submission dropped");
        }
        job_id
    }

    /// Requests cancellation of a queued or running job. Takes effect
    /// between listings; the listing in flight finishes first.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.cancels.lock().unwrap().get(job_id) {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }

    /// Stops accepting work and waits for the in-flight run to finish.
    pub async fn shutdown(mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                warn!(error = %err, "runner worker join error");
            }
        }
    }
}

impl Drop for PostingRunner {
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            if !worker.is_finished() {
                warn!("PostingRunner dropped without explicit shutdown");
            }
        }
    }
}
