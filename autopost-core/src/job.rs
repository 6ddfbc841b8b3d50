use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::sqlite::configure_connection;

const JOBS_SCHEMA: &str = include_str!("../../sql/jobs.sql");

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to open jobs database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on jobs database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("jobs path not configured")]
    MissingStore,
    #[error("invalid job status: {0}")]
    InvalidStatus(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job {0} counters already account for every listing")]
    CounterExceeded(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(JobError::InvalidStatus(other.to_string())),
        }
    }
}

/// The poll/stream payload handed to external callers.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub current_listing_id: Option<i64>,
    pub current_listing_title: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress_percentage: u8,
}

impl JobSnapshot {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let total: i64 = row.get("total")?;
        let completed: i64 = row.get("completed")?;
        let failed: i64 = row.get("failed")?;
        let progress = if total > 0 {
            (((completed + failed) * 100) / total).clamp(0, 100) as u8
        } else {
            0
        };
        Ok(Self {
            job_id: row.get("job_id")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(JobStatus::Running),
            total,
            completed,
            failed,
            current_listing_id: row.get("current_listing_id")?,
            current_listing_title: row.get("current_listing_title")?,
            error_message: row.get("error_message")?,
            started_at: parse_timestamp(row.get("started_at")?)?,
            completed_at: parse_timestamp(row.get("completed_at")?)?,
            progress_percentage: progress,
        })
    }
}

pub fn generate_job_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone)]
pub struct JobTracker {
    path: PathBuf,
    flags: OpenFlags,
}

impl JobTracker {
    pub fn new(path: impl AsRef<Path>) -> JobResult<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        })
    }

    fn open(&self) -> JobResult<Connection> {
        let conn =
            Connection::open_with_flags(&self.path, self.flags).map_err(|source| JobError::Open {
                source,
                path: self.path.clone(),
            })?;
        configure_connection(&conn).map_err(|source| JobError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> JobResult<()> {
        let conn = self.open()?;
        conn.execute_batch(JOBS_SCHEMA)?;
        Ok(())
    }

    pub fn start(&self, job_id: &str, total: usize) -> JobResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO posting_jobs (job_id, status, total) VALUES (?1, 'running', ?2)",
            params![job_id, total as i64],
        )?;
        Ok(())
    }

    /// Points the job at the listing about to be attempted. Called before
    /// each attempt, never after.
    pub fn record_progress(&self, job_id: &str, listing_id: i64, title: &str) -> JobResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE posting_jobs SET current_listing_id=?2, current_listing_title=?3
             WHERE job_id=?1",
            params![job_id, listing_id, title],
        )?;
        if affected == 0 {
            return Err(JobError::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    pub fn record_success(&self, job_id: &str) -> JobResult<()> {
        self.bump(job_id, "completed")
    }

    pub fn record_failure(&self, job_id: &str) -> JobResult<()> {
        self.bump(job_id, "failed")
    }

    /// Terminal stamp: `completed` when every listing succeeded, `failed`
    /// otherwise, with a summary message for the failures.
    pub fn finish(&self, job_id: &str) -> JobResult<JobSnapshot> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE posting_jobs SET
                 status = CASE WHEN failed = 0 THEN 'completed' ELSE 'failed' END,
                 error_message = CASE WHEN failed = 0 THEN NULL
                     ELSE failed || ' of ' || total || ' listings failed' END,
                 current_listing_id = NULL,
                 current_listing_title = NULL,
                 completed_at = CURRENT_TIMESTAMP
             WHERE job_id=?1",
            params![job_id],
        )?;
        if affected == 0 {
            return Err(JobError::NotFound(job_id.to_string()));
        }
        drop(conn);
        self.snapshot(job_id)
    }

    pub fn snapshot(&self, job_id: &str) -> JobResult<JobSnapshot> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM posting_jobs WHERE job_id = ?1")?;
        let mut rows = stmt.query([job_id])?;
        match rows.next()? {
            Some(row) => Ok(JobSnapshot::from_row(row)?),
            None => Err(JobError::NotFound(job_id.to_string())),
        }
    }

    pub fn list_recent(&self, limit: usize) -> JobResult<Vec<JobSnapshot>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT * FROM posting_jobs ORDER BY started_at DESC LIMIT ?1")?;
        let mut rows = stmt.query([limit as i64])?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next()? {
            jobs.push(JobSnapshot::from_row(row)?);
        }
        Ok(jobs)
    }

    /// Counter increments are guarded so `completed + failed` can never
    /// exceed `total`, whatever the caller does.
    fn bump(&self, job_id: &str, column: &str) -> JobResult<()> {
        let conn = self.open()?;
        let sql = format!(
            "UPDATE posting_jobs SET {column} = {column} + 1
             WHERE job_id = ?1 AND completed + failed < total"
        );
        let affected = conn.execute(&sql, params![job_id])?;
        if affected == 0 {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM posting_jobs WHERE job_id=?1",
                    [job_id],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if exists {
                return Err(JobError::CounterExceeded(job_id.to_string()));
            }
            return Err(JobError::NotFound(job_id.to_string()));
        }
        Ok(())
    }
}

fn parse_timestamp(value: Option<NaiveDateTime>) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    Ok(value.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)))
}
