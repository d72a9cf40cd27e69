use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotesyncError {
    #[error("not initialized: run 'notesync init'")]
    NotInitialized,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("invalid status '{0}': expected done, in_progress, planned or blocked")]
    InvalidStatus(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("more than one record has task id '{0}'")]
    DuplicateRecord(String),

    #[error("notes for '{0}' changed since they were read")]
    Conflict(String),

    #[error("record store rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("record store error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<NotesyncError>,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl NotesyncError {
    /// Transient failures worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        if let Self::RateLimited { retry_after_secs } = self {
            Some(*retry_after_secs)
        } else {
            None
        }
    }

    /// Classify for retry. Conflicts and retryable errors are transient,
    /// with the server's Retry-After attached; everything else is permanent.
    pub fn into_backoff(self) -> backoff::Error<Self> {
        if let Some(secs) = self.retry_after() {
            return backoff::Error::retry_after(self, Duration::from_secs(secs));
        }
        if matches!(self, Self::Conflict(_)) || self.is_retryable() {
            backoff::Error::transient(self)
        } else {
            backoff::Error::permanent(self)
        }
    }
}

pub type Result<T> = std::result::Result<T, NotesyncError>;
