use crate::error::{NotesyncError, Result};
use crate::paths;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const API_TOKEN_ENV: &str = "NOTESYNC_API_TOKEN";
pub const BASE_URL_ENV: &str = "NOTESYNC_BASE_URL";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// FieldNames
// ---------------------------------------------------------------------------

/// Column names on the remote table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldNames {
    #[serde(default = "default_task_id_field")]
    pub task_id: String,
    #[serde(default = "default_status_field")]
    pub status: String,
    #[serde(default = "default_notes_field")]
    pub notes: String,
}

fn default_task_id_field() -> String {
    "task_id".to_string()
}

fn default_status_field() -> String {
    "status".to_string()
}

fn default_notes_field() -> String {
    "notes".to_string()
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            task_id: default_task_id_field(),
            status: default_status_field(),
            notes: default_notes_field(),
        }
    }
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub base_id: String,
    pub table: String,
    /// Prefer `NOTESYNC_API_TOKEN` over committing a token here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub fields: FieldNames,
}

fn default_base_url() -> String {
    "https://api.airtable.com/v0".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn api_token(&self) -> Result<&str> {
        match self.api_token.as_deref() {
            Some(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(NotesyncError::MissingCredential(format!(
                "set {API_TOKEN_ENV} or store.api_token"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// No retries and no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Backoff schedule for one update: doubles from `initial_backoff_ms`,
    /// capped at `max_backoff_ms`, for at most `max_retries` retries.
    pub fn schedule(&self) -> RetrySchedule {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.max_backoff_ms))
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();
        RetrySchedule {
            backoff,
            max_retries: self.max_retries,
            remaining: self.max_retries,
        }
    }
}

/// An `ExponentialBackoff` bounded by a retry count.
pub struct RetrySchedule {
    backoff: ExponentialBackoff,
    max_retries: u32,
    remaining: u32,
}

impl RetrySchedule {
    /// Spend a retry without waiting. `None` once the budget is gone.
    pub fn immediate(&mut self) -> Option<Duration> {
        self.take().then_some(Duration::ZERO)
    }

    fn take(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

impl Backoff for RetrySchedule {
    fn next_backoff(&mut self) -> Option<Duration> {
        if !self.take() {
            return None;
        }
        self.backoff.next_backoff()
    }

    fn reset(&mut self) {
        self.backoff.reset();
        self.remaining = self.max_retries;
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub store: StoreConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new(base_id: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            version: 1,
            store: StoreConfig {
                base_url: default_base_url(),
                base_id: base_id.into(),
                table: table.into(),
                api_token: None,
                timeout_secs: default_timeout_secs(),
                fields: FieldNames::default(),
            },
            retry: RetryConfig::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(NotesyncError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Apply `NOTESYNC_API_TOKEN` / `NOTESYNC_BASE_URL` from the process
    /// environment.
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(token) = lookup(API_TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.store.api_token = Some(token);
        }
        if let Some(url) = lookup(BASE_URL_ENV).filter(|u| !u.is_empty()) {
            self.store.base_url = url;
        }
        self
    }

    /// Copy safe to print: the token is masked.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        if cfg.store.api_token.is_some() {
            cfg.store.api_token = Some("********".to_string());
        }
        cfg
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        if self.store.base_id.trim().is_empty() {
            error("store.base_id is empty".to_string());
        }
        if self.store.table.trim().is_empty() {
            error("store.table is empty".to_string());
        }
        if !self.store.base_url.starts_with("http://") && !self.store.base_url.starts_with("https://")
        {
            error(format!(
                "store.base_url '{}' is not an http(s) URL",
                self.store.base_url
            ));
        }
        if self.store.api_token().is_err() {
            error(format!("no API token: set {API_TOKEN_ENV}"));
        }

        let fields = &self.store.fields;
        for (key, value) in [
            ("task_id", &fields.task_id),
            ("status", &fields.status),
            ("notes", &fields.notes),
        ] {
            if value.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("store.fields.{key} is empty"),
                });
            }
        }
        if fields.notes == fields.status || fields.notes == fields.task_id {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "store.fields.notes '{}' collides with another field",
                    fields.notes
                ),
            });
        }

        if self.retry.max_retries > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "retry.max_retries={} (>10 is unusual)",
                    self.retry.max_retries
                ),
            });
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "retry.initial_backoff_ms exceeds retry.max_backoff_ms".to_string(),
            });
        }
        if self.store.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "store.timeout_secs is 0: requests never time out".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
