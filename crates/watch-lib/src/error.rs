//! Error types for the watch library

use thiserror::Error;

/// Errors raised while polling, detecting or persisting observations
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Overpass query aborted: {0}")]
    Remark(String),

    #[error("Decomposition failed: {0}")]
    Decomposition(String),

    #[error("Invalid place id: {0}")]
    InvalidPlaceId(String),

    #[error("{0} is required")]
    MissingComponent(&'static str),
}

impl WatchError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        WatchError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Whether a failed Overpass request is worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            WatchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            WatchError::Status { status, .. } => *status == 429 || *status >= 500,
            WatchError::Remark(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
