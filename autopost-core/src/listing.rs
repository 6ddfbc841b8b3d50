use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::Serialize;
use thiserror::Error;

use crate::sqlite::configure_connection;

const LISTINGS_SCHEMA: &str = include_str!("../../sql/listings.sql");

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("failed to open listings database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on listings database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("listings path not configured")]
    MissingStore,
    #[error("invalid listing status: {0}")]
    InvalidStatus(String),
    #[error("listing not found: {0}")]
    NotFound(i64),
    #[error("listing {id} is not in status {expected}")]
    InvalidTransition { id: i64, expected: ListingStatus },
    #[error("invalid listing: {0}")]
    Invalid(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type ListingResult<T> = Result<T, ListingError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Pending,
    Posting,
    Posted,
    Failed,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Pending => "pending",
            ListingStatus::Posting => "posting",
            ListingStatus::Posted => "posted",
            ListingStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ListingStatus::Posted | ListingStatus::Failed)
    }
}

impl std::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ListingStatus {
    type Err = ListingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "posting" => Ok(Self::Posting),
            "posted" => Ok(Self::Posted),
            "failed" => Ok(Self::Failed),
            other => Err(ListingError::InvalidStatus(other.to_string())),
        }
    }
}

/// A validated submission from the surrounding application. Validation
/// happens here, before the row enters `pending`.
#[derive(Debug, Clone)]
pub struct NewListing {
    pub account_id: String,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub image_path: Option<String>,
    pub scheduled_at: DateTime<Utc>,
}

impl NewListing {
    pub fn validate(&self) -> ListingResult<()> {
        if self.title.trim().is_empty() {
            return Err(ListingError::Invalid("title cannot be empty".into()));
        }
        if self.description.trim().is_empty() {
            return Err(ListingError::Invalid("description cannot be empty".into()));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(ListingError::Invalid(
                "price must be greater than 0".into(),
            ));
        }
        if self.account_id.trim().is_empty() {
            return Err(ListingError::Invalid("account id cannot be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub id: i64,
    pub account_id: String,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub image_path: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub status: ListingStatus,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Listing {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            price: row.get("price")?,
            image_path: row.get("image_path")?,
            scheduled_at: to_utc(row.get("scheduled_at")?),
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(ListingStatus::Pending),
            error_message: row.get("error_message")?,
            retry_count: row.get("retry_count")?,
            created_at: parse_timestamp(row.get("created_at")?)?,
            updated_at: parse_timestamp(row.get("updated_at")?)?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub status: Option<ListingStatus>,
    pub account_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ListingStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for ListingStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl ListingStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> ListingResult<ListingStore> {
        let path = self.path.ok_or(ListingError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(ListingStore { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct ListingStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl ListingStore {
    pub fn builder() -> ListingStoreBuilder {
        ListingStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> ListingResult<Self> {
        ListingStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> ListingResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            ListingError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| ListingError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> ListingResult<()> {
        let conn = self.open()?;
        conn.execute_batch(LISTINGS_SCHEMA)?;
        Ok(())
    }

    pub fn submit(&self, listing: &NewListing) -> ListingResult<i64> {
        listing.validate()?;
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO listings (account_id, title, description, price, image_path, scheduled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &listing.account_id,
                &listing.title,
                &listing.description,
                listing.price,
                &listing.image_path,
                listing.scheduled_at.naive_utc(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> ListingResult<Listing> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM listings WHERE id = ?1")?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Listing::from_row(row)?),
            None => Err(ListingError::NotFound(id)),
        }
    }

    pub fn list(&self, filter: &ListingFilter) -> ListingResult<Vec<Listing>> {
        let conn = self.open()?;
        let mut query = String::from("SELECT * FROM listings");
        let mut clauses = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            params.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(account) = &filter.account_id {
            clauses.push("account_id = ?");
            params.push(Value::Text(account.clone()));
        }
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(" ORDER BY scheduled_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            query.push_str(" LIMIT ?");
            params.push(Value::Integer(limit as i64));
        }
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(
            params.iter().map(|value| value as &dyn rusqlite::ToSql),
        ))?;
        let mut listings = Vec::new();
        while let Some(row) = rows.next()? {
            listings.push(Listing::from_row(row)?);
        }
        Ok(listings)
    }

    /// Pending listings whose scheduled time has passed, in queue order.
    pub fn due(&self, now: DateTime<Utc>) -> ListingResult<Vec<Listing>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM listings WHERE status = 'pending' AND scheduled_at <= ?1
             ORDER BY scheduled_at ASC, id ASC",
        )?;
        let mut rows = stmt.query([now.naive_utc()])?;
        let mut listings = Vec::new();
        while let Some(row) = rows.next()? {
            listings.push(Listing::from_row(row)?);
        }
        Ok(listings)
    }

    pub fn fetch_by_ids(&self, ids: &[i64]) -> ListingResult<Vec<Listing>> {
        let mut listings = Vec::with_capacity(ids.len());
        for id in ids {
            listings.push(self.get(*id)?);
        }
        Ok(listings)
    }

    /// `pending -> posting`. Refuses any other starting state so a terminal
    /// listing can never re-enter the machine without an explicit retry.
    pub fn begin_posting(&self, id: i64) -> ListingResult<()> {
        self.transition(
            id,
            ListingStatus::Pending,
            "UPDATE listings SET status='posting', updated_at=CURRENT_TIMESTAMP
             WHERE id=?1 AND status='pending'",
        )
    }

    pub fn mark_posted(&self, id: i64) -> ListingResult<()> {
        self.transition(
            id,
            ListingStatus::Posting,
            "UPDATE listings SET status='posted', error_message=NULL,
                 updated_at=CURRENT_TIMESTAMP
             WHERE id=?1 AND status='posting'",
        )
    }

    /// Terminal failure for this attempt: records the message and counts
    /// the attempt.
    pub fn mark_failed(&self, id: i64, message: &str) -> ListingResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE listings SET status='failed', error_message=?2,
                 retry_count=retry_count+1, updated_at=CURRENT_TIMESTAMP
             WHERE id=?1 AND status IN ('pending', 'posting')",
            params![id, message],
        )?;
        if affected == 0 {
            return Err(ListingError::NotFound(id));
        }
        Ok(())
    }

    /// Explicit operator reset: `failed -> pending`. Keeps the attempt
    /// counter.
    pub fn retry(&self, id: i64) -> ListingResult<()> {
        self.transition(
            id,
            ListingStatus::Failed,
            "UPDATE listings SET status='pending', error_message=NULL,
                 updated_at=CURRENT_TIMESTAMP
             WHERE id=?1 AND status='failed'",
        )
    }

    /// Bulk `failed -> pending` for listings still under the attempt cap.
    /// Only invoked when `[retry] auto_requeue` is enabled.
    pub fn requeue_failed(&self, max_attempts: u32) -> ListingResult<usize> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE listings SET status='pending', error_message=NULL,
                 updated_at=CURRENT_TIMESTAMP
             WHERE status='failed' AND retry_count < ?1",
            params![max_attempts as i64],
        )?;
        Ok(affected)
    }

    fn transition(&self, id: i64, expected: ListingStatus, sql: &str) -> ListingResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(sql, params![id])?;
        if affected == 0 {
            let exists: bool = conn
                .query_row("SELECT 1 FROM listings WHERE id=?1", [id], |_| Ok(true))
                .unwrap_or(false);
            if exists {
                return Err(ListingError::InvalidTransition { id, expected });
            }
            return Err(ListingError::NotFound(id));
        }
        Ok(())
    }
}

fn to_utc(value: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(value, Utc)
}

fn parse_timestamp(value: Option<NaiveDateTime>) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    Ok(value.map(to_utc))
}
