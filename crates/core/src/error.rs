use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid video reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Rate limit exceeded for video {video_id} after {hits} consecutive signals")]
    RateLimitExceeded { video_id: String, hits: u32 },

    #[error("Fetch failed for video {video_id} after {attempts} attempts: {reason}")]
    FetchFailed {
        video_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Malformed response for video {video_id}: {reason}")]
    MalformedResponse { video_id: String, reason: String },

    #[error("Request for video {video_id} rejected with status {status_code}: {message}")]
    Rejected {
        video_id: String,
        status_code: i64,
        message: String,
    },

    #[error("Fetch cancelled for video {video_id}")]
    Cancelled { video_id: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl FetchError {
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Failure reported by a [`CommentSource`](crate::source::CommentSource) for one request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Network or transport level failure; worth retrying.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("rejected with status {status_code}: {message}")]
    Rejected { status_code: i64, message: String },
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Transport(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}
