use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;

use crate::sqlite::configure_connection;

const ERROR_LOG_SCHEMA: &str = include_str!("../../sql/error_log.sql");

/// Coarse bucket assigned to a failure for operator triage. Best-effort:
/// a listing titled "Limited offer" will land in `rate_limit`, which is
/// acceptable because categories only feed diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    SessionMissing,
    SessionExpired,
    NetworkError,
    Captcha,
    RateLimit,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::SessionMissing => "session_missing",
            ErrorCategory::SessionExpired => "session_expired",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::Captcha => "captcha",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = ErrorLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session_missing" => Ok(Self::SessionMissing),
            "session_expired" => Ok(Self::SessionExpired),
            "network_error" => Ok(Self::NetworkError),
            "captcha" => Ok(Self::Captcha),
            "rate_limit" => Ok(Self::RateLimit),
            "unknown" => Ok(Self::Unknown),
            other => Err(ErrorLogError::InvalidCategory(other.to_string())),
        }
    }
}

/// Case-insensitive substring match, first hit wins.
pub fn classify(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    if ["session", "cookie", "login"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        ErrorCategory::SessionExpired
    } else if ["network", "connection"].iter().any(|kw| lower.contains(kw)) {
        ErrorCategory::NetworkError
    } else if lower.contains("captcha") {
        ErrorCategory::Captcha
    } else if ["rate", "limit"].iter().any(|kw| lower.contains(kw)) {
        ErrorCategory::RateLimit
    } else {
        ErrorCategory::Unknown
    }
}

#[derive(Debug, Error)]
pub enum ErrorLogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid error category: {0}")]
    InvalidCategory(String),
}

pub type ErrorLogResult<T> = Result<T, ErrorLogError>;

#[derive(Debug, Clone, Serialize)]
pub struct NewErrorEntry {
    pub listing_id: i64,
    pub category: ErrorCategory,
    pub message: String,
    pub screenshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorLogEntry {
    pub id: i64,
    pub listing_id: i64,
    pub category: ErrorCategory,
    pub message: String,
    pub screenshot_path: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ErrorLogFilter {
    pub listing_id: Option<i64>,
    pub category: Option<ErrorCategory>,
    pub limit: Option<usize>,
}

/// Append-only failure record: one row per failed attempt, mirrored to a
/// JSONL file so operators can tail failures without opening the database.
#[derive(Debug)]
pub struct ErrorLog {
    log: Mutex<File>,
    db_path: PathBuf,
    flags: OpenFlags,
}

impl ErrorLog {
    pub fn new(db_path: impl AsRef<Path>, log_path: impl AsRef<Path>) -> ErrorLogResult<Self> {
        let log_path = log_path.as_ref().to_path_buf();
        if let Some(parent) = log_path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            create_dir_all(parent)?;
        }
        let log = Self {
            log: Mutex::new(file),
            db_path,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };
        log.initialize_db()?;
        Ok(log)
    }

    fn initialize_db(&self) -> ErrorLogResult<()> {
        let conn = self.open_db()?;
        conn.execute_batch(ERROR_LOG_SCHEMA)?;
        Ok(())
    }

    fn open_db(&self) -> ErrorLogResult<Connection> {
        let conn = Connection::open_with_flags(&self.db_path, self.flags)?;
        configure_connection(&conn)?;
        Ok(conn)
    }

    pub fn append(&self, entry: &NewErrorEntry) -> ErrorLogResult<()> {
        let json = serde_json::to_string(entry)?;
        if let Ok(mut guard) = self.log.lock() {
            writeln!(guard, "{json}")?;
            guard.flush()?;
        }
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO error_log (listing_id, category, message, screenshot_path)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.listing_id,
                entry.category.as_str(),
                entry.message,
                entry
                    .screenshot_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn list(&self, filter: &ErrorLogFilter) -> ErrorLogResult<Vec<ErrorLogEntry>> {
        let conn = self.open_db()?;
        let mut query = String::from("SELECT * FROM error_log");
        let mut clauses = Vec::new();
        let mut params: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(listing_id) = filter.listing_id {
            clauses.push("listing_id = ?");
            params.push(rusqlite::types::Value::Integer(listing_id));
        }
        if let Some(category) = filter.category {
            clauses.push("category = ?");
            params.push(rusqlite::types::Value::Text(category.as_str().to_string()));
        }
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(" ORDER BY created_at DESC, id DESC");
        let limit = filter.limit.unwrap_or(50);
        query.push_str(" LIMIT ?");
        params.push(rusqlite::types::Value::Integer(limit as i64));
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(
            params.iter().map(|value| value as &dyn rusqlite::ToSql),
        ))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(ErrorLogEntry {
                id: row.get("id")?,
                listing_id: row.get("listing_id")?,
                category: row
                    .get::<_, String>("category")?
                    .parse()
                    .unwrap_or(ErrorCategory::Unknown),
                message: row.get("message")?,
                screenshot_path: row.get("screenshot_path")?,
                created_at: row
                    .get::<_, Option<NaiveDateTime>>("created_at")?
                    .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)),
            });
        }
        Ok(entries)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn classify_matches_in_priority_order() {
        assert_eq!(classify("Login cookie rejected"), ErrorCategory::SessionExpired);
        assert_eq!(classify("connection reset by peer"), ErrorCategory::NetworkError);
        assert_eq!(classify("captcha challenge shown"), ErrorCategory::Captcha);
        assert_eq!(classify("You are posting too fast, rate exceeded"), ErrorCategory::RateLimit);
        assert_eq!(classify("element vanished"), ErrorCategory::Unknown);
        // session keywords outrank network ones
        assert_eq!(
            classify("network failure while refreshing session"),
            ErrorCategory::SessionExpired
        );
    }

    #[test]
    fn classify_is_best_effort_only() {
        // A message quoting a listing title can misfire; that is accepted.
        assert_eq!(
            classify("could not fill title 'Limited edition lamp'"),
            ErrorCategory::RateLimit
        );
    }

    #[test]
    fn append_persists_to_both_sinks() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("autopost.sqlite");
        let log_path = dir.path().join("failures.jsonl");
        let log = ErrorLog::new(&db_path, &log_path).unwrap();

        log.append(&NewErrorEntry {
            listing_id: 7,
            category: ErrorCategory::Captcha,
            message: "captcha challenge shown".into(),
            screenshot_path: Some(dir.path().join("shot.png")),
        })
        .unwrap();

        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("captcha challenge shown"));

        let entries = log.list(&ErrorLogFilter::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].listing_id, 7);
        assert_eq!(entries[0].category, ErrorCategory::Captcha);
        assert!(entries[0].screenshot_path.is_some());
    }

    #[test]
    fn list_filters_by_listing_and_category() {
        let dir = tempdir().unwrap();
        let log = ErrorLog::new(
            dir.path().join("autopost.sqlite"),
            dir.path().join("failures.jsonl"),
        )
        .unwrap();
        for (listing_id, category) in [
            (1, ErrorCategory::Captcha),
            (1, ErrorCategory::Unknown),
            (2, ErrorCategory::Captcha),
        ] {
            log.append(&NewErrorEntry {
                listing_id,
                category,
                message: "x".into(),
                screenshot_path: None,
            })
            .unwrap();
        }

        let filtered = log
            .list(&ErrorLogFilter {
                listing_id: Some(1),
                category: Some(ErrorCategory::Captcha),
                limit: None,
            })
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].listing_id, 1);
    }
}
