use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::browser::{BrowserAutomation, BrowserError, BrowserLauncher, LaunchOverrides};
use crate::config::SessionSection;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no saved session for account {0}")]
    NotFound(String),
    #[error("login for {account_id} not completed within {waited_seconds}s")]
    AuthenticationTimeout {
        account_id: String,
        waited_seconds: u64,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// One captured cookie, with enough attributes to reinstall it verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: f64,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<String>,
}

/// The opaque authenticated-context snapshot: cookies plus localStorage
/// pairs for the marketplace origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    pub cookies: Vec<SessionCookie>,
    pub local_storage: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub account_id: String,
    pub saved_at: DateTime<Utc>,
    pub state: StorageState,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub account_id: String,
    pub saved_at: DateTime<Utc>,
    pub age_days: f64,
    pub path: PathBuf,
}

/// Deterministic, filesystem-safe key for an account identifier.
pub fn session_key(account_id: &str) -> String {
    account_id
        .trim()
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

/// Persists one authenticated browsing-context snapshot per account. No
/// expiry: a snapshot stays trusted until a failed use or an explicit
/// invalidation replaces it.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    login_url: String,
    config: SessionSection,
}

impl SessionStore {
    pub fn new(dir: impl AsRef<Path>, login_url: impl Into<String>, config: SessionSection) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            login_url: login_url.into(),
            config,
        }
    }

    pub fn record_path(&self, account_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", session_key(account_id)))
    }

    pub fn exists(&self, account_id: &str) -> bool {
        self.record_path(account_id).exists()
    }

    /// Opens a headful browser on the login page and blocks until the
    /// operator finishes logging in (signalled by the auth cookie) or the
    /// bounded wait elapses. The captured state overwrites any previous
    /// snapshot for the account.
    pub async fn save(
        &self,
        launcher: &BrowserLauncher,
        account_id: &str,
    ) -> SessionResult<SessionRecord> {
        let automation = launcher
            .launch_with_overrides(LaunchOverrides {
                headless: Some(false),
            })
            .await?;
        let captured = self.capture_login(&automation, account_id).await;
        if let Err(err) = automation.shutdown().await {
            warn!(error = %err, "browser shutdown after login capture failed");
        }
        let record = captured?;
        self.persist(&record)?;
        info!(account = %account_id, path = %self.record_path(account_id).display(), "session saved");
        Ok(record)
    }

    async fn capture_login(
        &self,
        automation: &BrowserAutomation,
        account_id: &str,
    ) -> SessionResult<SessionRecord> {
        let context = automation.new_context().await?;
        context.goto(&self.login_url).await?;

        let wait = Duration::from_secs(self.config.login_wait_seconds);
        let poll = Duration::from_millis(self.config.login_poll_interval_ms.max(100));
        let deadline = Instant::now() + wait;
        loop {
            if context.has_cookie(&self.config.auth_cookie).await? {
                break;
            }
            if Instant::now() >= deadline {
                return Err(SessionError::AuthenticationTimeout {
                    account_id: account_id.to_string(),
                    waited_seconds: self.config.login_wait_seconds,
                });
            }
            sleep(poll).await;
        }

        let state = context.capture_storage_state().await?;
        Ok(SessionRecord {
            account_id: account_id.to_string(),
            saved_at: Utc::now(),
            state,
        })
    }

    pub fn persist(&self, record: &SessionRecord) -> SessionResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let bytes = serde_json::to_vec_pretty(record)?;
        std::fs::write(self.record_path(&record.account_id), bytes)?;
        Ok(())
    }

    pub fn load(&self, account_id: &str) -> SessionResult<SessionRecord> {
        let path = self.record_path(account_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(account_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Removes the snapshot. Deleting a session that does not exist is not
    /// an error.
    pub fn invalidate(&self, account_id: &str) -> SessionResult<()> {
        let path = self.record_path(account_id);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(account = %account_id, "session invalidated");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn list(&self) -> SessionResult<Vec<SessionInfo>> {
        let mut sessions = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
            Err(err) => return Err(err.into()),
        };
        let now = Utc::now();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let record: SessionRecord = match std::fs::read(&path)
                .map_err(SessionError::from)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(SessionError::from))
            {
                Ok(record) => record,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable session record");
                    continue;
                }
            };
            let age_days = (now - record.saved_at).num_seconds().max(0) as f64 / 86_400.0;
            sessions.push(SessionInfo {
                account_id: record.account_id,
                saved_at: record.saved_at,
                age_days,
                path,
            });
        }
        sessions.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(dir: &Path) -> SessionStore {
        SessionStore::new(
            dir,
            "https://example.com/login",
            SessionSection {
                dir: dir.to_string_lossy().to_string(),
                auth_cookie: "c_user".into(),
                login_wait_seconds: 60,
                login_poll_interval_ms: 1000,
            },
        )
    }

    fn sample_record(account_id: &str) -> SessionRecord {
        SessionRecord {
            account_id: account_id.to_string(),
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
                local_storage: BTreeMap::from([("region".to_string(), "eu".to_string())]),
            },
        }
    }

    #[test]
    fn keys_are_normalized_and_deterministic() {
        assert_eq!(session_key("Seller@Example.COM"), "seller_example_com");
        assert_eq!(session_key(" seller@example.com "), "seller_example_com");
        assert_eq!(session_key("a+b@c.io"), "a_b_c_io");
    }

    #[test]
    fn persist_then_load_round_trips_storage_state() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let record = sample_record("seller@example.com");
        store.persist(&record).unwrap();

        let loaded = store.load("seller@example.com").unwrap();
        assert_eq!(loaded, record);

        // Re-persisting the loaded record writes identical bytes.
        let first = std::fs::read(store.record_path("seller@example.com")).unwrap();
        store.persist(&loaded).unwrap();
        let second = std::fs::read(store.record_path("seller@example.com")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn load_missing_session_is_not_found() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let err = store.load("ghost@example.com").unwrap_err();
        assert!(matches!(err, SessionError::NotFound(account) if account == "ghost@example.com"));
    }

    #[test]
    fn invalidate_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.persist(&sample_record("seller@example.com")).unwrap();
        assert!(store.exists("seller@example.com"));

        store.invalidate("seller@example.com").unwrap();
        assert!(!store.exists("seller@example.com"));
        store.invalidate("seller@example.com").unwrap();
    }

    #[test]
    fn list_reports_saved_sessions_with_age() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.persist(&sample_record("b@example.com")).unwrap();
        store.persist(&sample_record("a@example.com")).unwrap();

        let sessions = store.list().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].account_id, "a@example.com");
        assert!(sessions[0].age_days < 1.0);
    }
}
