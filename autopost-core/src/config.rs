use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AutopostConfig {
    pub chromium: ChromiumSection,
    pub flags: FlagsSection,
    pub marketplace: MarketplaceSection,
    pub session: SessionSection,
    pub form: FormSection,
    pub typing: TypingSection,
    pub retry: RetrySection,
    pub stream: StreamSection,
    pub storage: StorageSection,
}

impl AutopostConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.storage.data_dir).join(path)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_path(&self.storage.database)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.resolve_path(&self.session.dir)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.resolve_path(&self.storage.artifacts_dir)
    }

    pub fn failure_log_path(&self) -> PathBuf {
        self.resolve_path(&self.storage.failure_log)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: String,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub tab_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagsSection {
    pub no_first_run: bool,
    pub disable_automation_controlled: bool,
    pub disable_blink_features: Vec<String>,
    pub mute_audio: bool,
    pub lang: Option<String>,
    pub accept_language: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceSection {
    pub login_url: String,
    pub create_listing_url: String,
    /// Option labels picked inside the category/condition/availability
    /// dropdowns once they are open.
    pub category_option: String,
    pub condition_option: String,
    pub availability_option: String,
    /// Confirmation buttons clicked in order after the form is filled.
    pub confirm_labels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    pub dir: String,
    /// Name of the cookie whose appearance signals a completed login.
    pub auth_cookie: String,
    pub login_wait_seconds: u64,
    pub login_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormSection {
    /// Inputs above this page-Y are treated as chrome (search bar etc.)
    /// by the structural locator.
    pub header_y_threshold_px: f64,
    /// Settle delay after filling each field.
    pub settle_ms: u64,
    /// Settle delay after opening a dropdown, before picking an option.
    pub dropdown_settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypingSection {
    pub cadence_cpm: [u32; 2],
    pub jitter_ms: [u32; 2],
    pub click_hesitation_ms: [u32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    /// When true, `run --include-failed` re-queues failed listings below
    /// the attempt cap. Failed listings are never re-queued mid-run.
    pub auto_requeue: bool,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamSection {
    pub poll_interval_ms: u64,
    /// A snapshot is pushed at least every this many polls even without
    /// progress.
    pub heartbeat_ticks: u32,
    pub max_duration_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub data_dir: String,
    pub database: String,
    pub artifacts_dir: String,
    pub failure_log: String,
}

pub fn load_autopost_config<P: AsRef<Path>>(path: P) -> Result<AutopostConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
