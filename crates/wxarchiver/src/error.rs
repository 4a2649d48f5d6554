use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiverError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Outcome of a remote call that did not produce a usable response.
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// 404/410: the resource aged out or never existed.
    #[error("Not found: {url}")]
    NotFound { url: String },

    #[error("Rate limited by source: {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Integrity check failed for {url} ({algorithm} mismatch)")]
    IntegrityMismatch { url: String, algorithm: String },
}

impl SourceError {
    /// Whether another attempt at the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::RateLimited { .. }
            | SourceError::Transport(_)
            | SourceError::IntegrityMismatch { .. } => true,
            SourceError::Http { status, .. } => *status >= 500,
            SourceError::NotFound { .. } | SourceError::InvalidResponse(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound { .. })
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::InvalidResponse(err.to_string())
        } else {
            SourceError::Transport(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move temp file into '{path}': {source}")]
    PersistFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive root '{path}' is not writable: {source}")]
    RootUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Worker panicked: {0}")]
    Panicked(String),
}

/// Errors that stop a run from doing any work at all.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Archive root unavailable: {0}")]
    ArchiveRoot(#[from] StorageError),

    #[error("Airport list unavailable: {0}")]
    AirportList(#[source] SourceError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

pub type Result<T> = std::result::Result<T, ArchiverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SourceError::Transport("reset".into()).is_retryable());
        assert!(SourceError::RateLimited {
            url: "u".into(),
            retry_after: None
        }
        .is_retryable());
        assert!(SourceError::Http {
            status: 503,
            url: "u".into()
        }
        .is_retryable());
        assert!(!SourceError::Http {
            status: 403,
            url: "u".into()
        }
        .is_retryable());
        assert!(!SourceError::NotFound { url: "u".into() }.is_retryable());
        assert!(!SourceError::InvalidResponse("html".into()).is_retryable());
    }

    #[test]
    fn test_run_error_display_wraps_source() {
        let err = RunError::AirportList(SourceError::Transport("dns".into()));
        assert_eq!(
            err.to_string(),
            "Airport list unavailable: Transport error: dns"
        );
    }
}
