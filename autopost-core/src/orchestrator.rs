use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::browser::form::{FormFiller, ListingForm, PageSurface};
use crate::browser::{BrowserError, BrowserLauncher, InputPacer};
use crate::config::{MarketplaceSection, RetrySection, TypingSection};
use crate::errlog::{classify, ErrorCategory, ErrorLog, ErrorLogError, NewErrorEntry};
use crate::job::{JobError, JobSnapshot, JobTracker};
use crate::listing::{Listing, ListingError, ListingStore};
use crate::session::{SessionError, SessionRecord, SessionStore};

/// What went wrong inside one listing's automation.
#[derive(Debug, Error)]
pub enum PostingError {
    #[error("session missing for account {0}")]
    SessionMissing(String),
    #[error(transparent)]
    Session(SessionError),
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error(transparent)]
    Store(#[from] ListingError),
}

impl PostingError {
    /// Category for the error log. Session absence is structural and is
    /// assigned directly; everything else goes through the message
    /// heuristic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            PostingError::SessionMissing(_) => ErrorCategory::SessionMissing,
            other => classify(&other.to_string()),
        }
    }
}

/// A failed attempt plus whatever diagnostics made it out of the browser
/// before teardown.
#[derive(Debug)]
pub struct PostAttemptFailure {
    pub error: PostingError,
    pub screenshot: Option<PathBuf>,
}

impl PostAttemptFailure {
    pub fn bare(error: impl Into<PostingError>) -> Self {
        Self {
            error: error.into(),
            screenshot: None,
        }
    }
}

/// The browser half of a posting attempt. The orchestrator only sees this
/// seam, which keeps the state machine testable without Chromium.
#[async_trait]
pub trait ListingPoster: Send + Sync {
    async fn post(
        &self,
        session: &SessionRecord,
        listing: &Listing,
    ) -> Result<(), PostAttemptFailure>;
}

/// Cooperative cancellation, honoured between listings only: the listing in
/// flight always runs to a terminal state.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub enum ListingSelection {
    /// All pending listings whose scheduled time has passed.
    Due,
    /// Specific listings, attempted in the given order.
    Ids(Vec<i64>),
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub job_id: String,
    pub selection: ListingSelection,
    /// Re-queue failed listings before selecting. Only honoured when
    /// `[retry] auto_requeue` is enabled.
    pub include_failed: bool,
}

/// Failures of the run machinery itself, as opposed to failures of a
/// single listing, which never abort the batch.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Listing(#[from] ListingError),
    #[error(transparent)]
    ErrorLog(#[from] ErrorLogError),
}

/// Drives one batch end to end: select listings, walk them strictly in
/// order, and keep the job counters truthful whatever each listing does.
pub struct PostingOrchestrator {
    listings: ListingStore,
    jobs: JobTracker,
    errors: Arc<ErrorLog>,
    sessions: SessionStore,
    poster: Arc<dyn ListingPoster>,
    retry: RetrySection,
}

impl PostingOrchestrator {
    pub fn new(
        listings: ListingStore,
        jobs: JobTracker,
        errors: Arc<ErrorLog>,
        sessions: SessionStore,
        poster: Arc<dyn ListingPoster>,
        retry: RetrySection,
    ) -> Self {
        Self {
            listings,
            jobs,
            errors,
            sessions,
            poster,
            retry,
        }
    }

    pub async fn run(&self, request: &RunRequest, cancel: &CancelFlag) -> Result<JobSnapshot, RunError> {
        if request.include_failed && self.retry.auto_requeue {
            let requeued = self.listings.requeue_failed(self.retry.max_attempts)?;
            if requeued > 0 {
                info!(job = %request.job_id, requeued, "re-queued failed listings");
            }
        }

        let batch = match &request.selection {
            ListingSelection::Due => self.listings.due(Utc::now())?,
            ListingSelection::Ids(ids) => self.listings.fetch_by_ids(ids)?,
        };
        info!(job = %request.job_id, total = batch.len(), "posting run started");
        self.jobs.start(&request.job_id, batch.len())?;

        for listing in batch {
            if cancel.is_cancelled() {
                info!(job = %request.job_id, "run cancelled between listings");
                break;
            }
            self.jobs
                .record_progress(&request.job_id, listing.id, &listing.title)?;
            match self.attempt(&listing).await {
                Ok(()) => {
                    self.listings.mark_posted(listing.id)?;
                    self.jobs.record_success(&request.job_id)?;
                    info!(job = %request.job_id, listing = listing.id, title = %listing.title, "listing posted");
                }
                Err(failure) => {
                    let message = failure.error.to_string();
                    let category = failure.error.category();
                    self.listings.mark_failed(listing.id, &message)?;
                    self.errors.append(&NewErrorEntry {
                        listing_id: listing.id,
                        category,
                        message: message.clone(),
                        screenshot_path: failure.screenshot,
                    })?;
                    self.jobs.record_failure(&request.job_id)?;
                    warn!(
                        job = %request.job_id,
                        listing = listing.id,
                        category = %category,
                        error = %message,
                        "listing failed"
                    );
                }
            }
        }

        let snapshot = self.jobs.finish(&request.job_id)?;
        info!(
            job = %request.job_id,
            status = %snapshot.status,
            completed = snapshot.completed,
            failed = snapshot.failed,
            "posting run finished"
        );
        Ok(snapshot)
    }

    /// One listing, `pending -> posting -> {posted | failed}`. The session
    /// must load before the listing enters `posting`; a missing snapshot
    /// fails the listing without ever opening a browser.
    async fn attempt(&self, listing: &Listing) -> Result<(), PostAttemptFailure> {
        let session = match self.sessions.load(&listing.account_id) {
            Ok(session) => session,
            Err(SessionError::NotFound(account)) => {
                return Err(PostAttemptFailure {
                    error: PostingError::SessionMissing(account),
                    screenshot: None,
                });
            }
            Err(err) => {
                return Err(PostAttemptFailure {
                    error: PostingError::Session(err),
                    screenshot: None,
                });
            }
        };
        self.listings
            .begin_posting(listing.id)
            .map_err(PostAttemptFailure::bare)?;
        self.poster.post(&session, listing).await
    }
}

/// Live poster: launches Chromium, seeds the saved session, fills the form
/// field by field and publishes. The browser is always shut down, success
/// or failure; a diagnostic screenshot is taken before teardown when the
/// attempt failed.
pub struct BrowserPoster {
    launcher: BrowserLauncher,
    filler: FormFiller,
    marketplace: MarketplaceSection,
    typing: TypingSection,
    artifacts_dir: PathBuf,
}

impl BrowserPoster {
    pub fn new(
        launcher: BrowserLauncher,
        filler: FormFiller,
        marketplace: MarketplaceSection,
        typing: TypingSection,
        artifacts_dir: PathBuf,
    ) -> Self {
        Self {
            launcher,
            filler,
            marketplace,
            typing,
            artifacts_dir,
        }
    }

    fn listing_form(&self, listing: &Listing) -> ListingForm {
        ListingForm {
            title: listing.title.clone(),
            price: format_price(listing.price),
            description: listing.description.clone(),
            image: listing.image_path.clone().map(PathBuf::from),
            category: self.marketplace.category_option.clone(),
            condition: self.marketplace.condition_option.clone(),
            availability: self.marketplace.availability_option.clone(),
        }
    }

    async fn drive(
        &self,
        context: &crate::browser::BrowserContext,
        session: &SessionRecord,
        listing: &Listing,
    ) -> Result<(), BrowserError> {
        context.seed_cookies(&session.state).await?;
        context.goto(&self.marketplace.create_listing_url).await?;
        context.restore_local_storage(&session.state).await?;

        let mut surface = PageSurface::new(context, InputPacer::new(self.typing.clone()));
        let form = self.listing_form(listing);
        self.filler.fill_form(&mut surface, &form).await?;
        self.filler
            .confirm(&mut surface, &self.marketplace.confirm_labels)
            .await?;
        Ok(())
    }

    async fn capture_failure_screenshot(
        &self,
        context: &crate::browser::BrowserContext,
        listing: &Listing,
    ) -> Option<PathBuf> {
        let filename = format!(
            "listing-{}-{}.png",
            listing.id,
            Utc::now().format("%Y%m%dT%H%M%S")
        );
        let path = self.artifacts_dir.join(filename);
        match context.screenshot_to(&path).await {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(listing = listing.id, error = %err, "failed to capture diagnostic screenshot");
                None
            }
        }
    }
}

#[async_trait]
impl ListingPoster for BrowserPoster {
    async fn post(
        &self,
        session: &SessionRecord,
        listing: &Listing,
    ) -> Result<(), PostAttemptFailure> {
        let automation = self
            .launcher
            .launch()
            .await
            .map_err(PostAttemptFailure::bare)?;

        let context = match automation.new_context().await {
            Ok(context) => context,
            Err(err) => {
                if let Err(shutdown_err) = automation.shutdown().await {
                    warn!(error = %shutdown_err, "browser shutdown failed");
                }
                return Err(PostAttemptFailure::bare(err));
            }
        };

        let failure = match self.drive(&context, session, listing).await {
            Ok(()) => None,
            Err(error) => {
                let screenshot = self.capture_failure_screenshot(&context, listing).await;
                Some(PostAttemptFailure {
                    error: error.into(),
                    screenshot,
                })
            }
        };

        if let Err(err) = automation.shutdown().await {
            warn!(error = %err, "browser shutdown failed");
        }

        match failure {
            None => Ok(()),
            Some(failure) => Err(failure),
        }
    }
}

/// "120" rather than "120.0"; two decimals only when the price has cents.
fn format_price(price: f64) -> String {
    if (price - price.trunc()).abs() < f64::EPSILON {
        format!("{}", price.trunc() as i64)
    } else {
        format!("{price:.2}")
    }
}
