use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;

use autopost_core::browser::BrowserError;
use autopost_core::{
    load_autopost_config, AutopostConfig, BrowserLauncher, ConfigError, ErrorLog, ErrorLogEntry,
    ErrorLogError, JobError, JobSnapshot, JobTracker, Listing, ListingError, ListingStore,
    PostingOrchestrator, RunError, SessionError, SessionInfo, SessionStore, StatusReporter,
};

pub mod commands;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("listing store error: {0}")]
    Listings(#[from] ListingError),
    #[error("job tracker error: {0}")]
    Jobs(#[from] JobError),
    #[error("error log error: {0}")]
    ErrorLog(#[from] ErrorLogError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("run error: {0}")]
    Run(#[from] RunError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("job {job_id} finished with failures: {summary}")]
    JobFailed { job_id: String, summary: String },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Marketplace autoposting control interface", long_about = None)]
pub struct Cli {
    /// Path to the main autopost.toml
    #[arg(long, default_value = "configs/autopost.toml")]
    pub config: PathBuf,
    /// Override for storage.data_dir
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Post due (or selected) listings now and wait for the outcome
    Run(RunArgs),
    /// Saved browser sessions
    #[command(subcommand)]
    Session(SessionCommands),
    /// Listing queue
    #[command(subcommand)]
    Listing(ListingCommands),
    /// Posting jobs
    #[command(subcommand)]
    Job(JobCommands),
    /// Error log
    #[command(subcommand)]
    Errors(ErrorCommands),
    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Post only these listing ids, in order, instead of everything due
    #[arg(long, value_delimiter = ',')]
    pub listing_ids: Vec<i64>,
    /// Tag the run with a caller-chosen job id
    #[arg(long)]
    pub job_id: Option<String>,
    /// Re-queue failed listings first (requires retry.auto_requeue)
    #[arg(long, default_value_t = false)]
    pub include_failed: bool,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Open a browser for manual login and capture the session
    Save(SessionAccountArgs),
    /// List saved sessions with their age
    List,
    /// Delete a saved session
    Invalidate(SessionAccountArgs),
}

#[derive(Args, Debug)]
pub struct SessionAccountArgs {
    /// Account identifier (email)
    #[arg(long)]
    pub account: String,
}

#[derive(Subcommand, Debug)]
pub enum ListingCommands {
    /// List listings
    List(ListingListArgs),
    /// Submit a new listing
    Add(ListingAddArgs),
    /// Reset a failed listing back to pending
    Retry(ListingRetryArgs),
}

#[derive(Args, Debug)]
pub struct ListingListArgs {
    /// Filter by status (pending, posting, posted, failed)
    #[arg(long)]
    pub status: Option<String>,
    /// Filter by account
    #[arg(long)]
    pub account: Option<String>,
    /// Maximum rows returned
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct ListingAddArgs {
    #[arg(long)]
    pub account: String,
    #[arg(long)]
    pub title: String,
    #[arg(long)]
    pub description: String,
    #[arg(long)]
    pub price: f64,
    /// Path to the listing image
    #[arg(long)]
    pub image: Option<String>,
    /// RFC 3339 timestamp; defaults to now
    #[arg(long)]
    pub scheduled_at: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListingRetryArgs {
    #[arg(long)]
    pub id: i64,
}

#[derive(Subcommand, Debug)]
pub enum JobCommands {
    /// One-shot job snapshot
    Status(JobIdArgs),
    /// Follow a job until it closes
    Watch(JobIdArgs),
    /// Most recent jobs
    Recent(JobRecentArgs),
}

#[derive(Args, Debug)]
pub struct JobIdArgs {
    #[arg(long)]
    pub job_id: String,
}

#[derive(Args, Debug)]
pub struct JobRecentArgs {
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum ErrorCommands {
    /// List error log entries
    List(ErrorListArgs),
}

#[derive(Args, Debug)]
pub struct ErrorListArgs {
    /// Filter by listing id
    #[arg(long)]
    pub listing_id: Option<i64>,
    /// Filter by category (session_missing, session_expired, ...)
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        commands::completions(args);
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    let runtime = tokio::runtime::Runtime::new()?;

    match &cli.command {
        Commands::Run(args) => commands::run::execute(&context, args, cli.format, &runtime),
        Commands::Session(command) => {
            commands::session::execute(&context, command, cli.format, &runtime)
        }
        Commands::Listing(command) => commands::listing::execute(&context, command, cli.format),
        Commands::Job(command) => commands::job::execute(&context, command, cli.format, &runtime),
        Commands::Errors(command) => commands::errors::execute(&context, command, cli.format),
        Commands::Completions(_) => unreachable!("handled above"),
    }
}

pub struct AppContext {
    pub config: AutopostConfig,
}

impl AppContext {
    pub fn new(cli: &Cli) -> Result<Self> {
        let mut config = load_autopost_config(&cli.config)?;
        if let Some(data_dir) = &cli.data_dir {
            config.storage.data_dir = data_dir.to_string_lossy().to_string();
        }
        std::fs::create_dir_all(&config.storage.data_dir)?;
        Ok(Self { config })
    }

    pub fn listings(&self) -> Result<ListingStore> {
        let store = ListingStore::builder()
            .path(self.config.database_path())
            .build()?;
        store.initialize()?;
        Ok(store)
    }

    pub fn jobs(&self) -> Result<JobTracker> {
        let tracker = JobTracker::new(self.config.database_path())?;
        tracker.initialize()?;
        Ok(tracker)
    }

    pub fn errors(&self) -> Result<Arc<ErrorLog>> {
        Ok(Arc::new(ErrorLog::new(
            self.config.database_path(),
            self.config.failure_log_path(),
        )?))
    }

    pub fn sessions(&self) -> SessionStore {
        SessionStore::new(
            self.config.sessions_dir(),
            self.config.marketplace.login_url.clone(),
            self.config.session.clone(),
        )
    }

    pub fn launcher(&self) -> Result<BrowserLauncher> {
        Ok(BrowserLauncher::new(
            self.config.chromium.clone(),
            self.config.flags.clone(),
            self.config.resolve_path("profiles"),
        )?)
    }

    pub fn reporter(&self) -> Result<StatusReporter> {
        Ok(StatusReporter::new(self.jobs()?, self.config.stream.clone()))
    }

    pub fn orchestrator(&self) -> Result<PostingOrchestrator> {
        use autopost_core::browser::form::FormFiller;
        use autopost_core::BrowserPoster;

        let poster = BrowserPoster::new(
            self.launcher()?,
            FormFiller::new(self.config.form.clone()),
            self.config.marketplace.clone(),
            self.config.typing.clone(),
            self.config.artifacts_dir(),
        );
        Ok(PostingOrchestrator::new(
            self.listings()?,
            self.jobs()?,
            self.errors()?,
            self.sessions(),
            Arc::new(poster),
            self.config.retry.clone(),
        ))
    }
}

pub(crate) fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

pub(crate) trait DisplayFallback {
    fn display(&self) -> String;
}

impl DisplayFallback for JobSnapshot {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "job {}: {} — {}/{} completed, {} failed ({}%)",
            self.job_id,
            self.status,
            self.completed,
            self.total,
            self.failed,
            self.progress_percentage
        )];
        if let (Some(id), Some(title)) = (self.current_listing_id, &self.current_listing_title) {
            lines.push(format!("  processing #{id}: {title}"));
        }
        if let Some(message) = &self.error_message {
            lines.push(format!("  {message}"));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for Vec<JobSnapshot> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "no jobs recorded".to_string();
        }
        self.iter()
            .map(DisplayFallback::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for Vec<SessionInfo> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "no saved sessions".to_string();
        }
        self.iter()
            .map(|info| {
                format!(
                    "{} — saved {} ({:.1} days ago)",
                    info.account_id,
                    info.saved_at.format("%Y-%m-%d %H:%M UTC"),
                    info.age_days
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for Vec<Listing> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "no listings".to_string();
        }
        self.iter()
            .map(|listing| {
                let mut line = format!(
                    "#{} [{}] {} — {} @ {} (retries: {})",
                    listing.id,
                    listing.status,
                    listing.title,
                    listing.account_id,
                    listing.scheduled_at.format("%Y-%m-%d %H:%M UTC"),
                    listing.retry_count
                );
                if let Some(error) = &listing.error_message {
                    line.push_str(&format!("\n    last error: {error}"));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for Vec<ErrorLogEntry> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "no errors logged".to_string();
        }
        self.iter()
            .map(|entry| {
                let mut line = format!(
                    "listing {} [{}] {}",
                    entry.listing_id, entry.category, entry.message
                );
                if let Some(shot) = &entry.screenshot_path {
                    line.push_str(&format!(" (screenshot: {shot})"));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use autopost_core::JobStatus;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_parses_run_with_listing_ids() {
        let cli = Cli::parse_from([
            "autopostctl",
            "run",
            "--listing-ids",
            "3,5,8",
            "--job-id",
            "nightly",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.listing_ids, vec![3, 5, 8]);
                assert_eq!(args.job_id.as_deref(), Some("nightly"));
                assert!(!args.include_failed);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn job_snapshot_text_rendering_is_compact() {
        let snapshot = JobSnapshot {
            job_id: "nightly".into(),
            status: JobStatus::Running,
            total: 4,
            completed: 1,
            failed: 1,
            current_listing_id: Some(9),
            current_listing_title: Some("Mid-century armchair".into()),
            error_message: None,
            started_at: None,
            completed_at: None,
            progress_percentage: 50,
        };
        let text = snapshot.display();
        assert!(text.contains("job nightly: running — 1/4 completed, 1 failed (50%)"));
        assert!(text.contains("processing #9: Mid-century armchair"));
    }
}
