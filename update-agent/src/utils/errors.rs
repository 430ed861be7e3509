//! Error taxonomy for feed fetching, reconciliation and downloads.
//!
//! Per-unit failures (one mirror, one file/mirror pair) are converted into
//! fallback decisions where they happen. Only exhaustion, fatal I/O and
//! cancellation reach the caller.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Signature mismatch for {0}")]
    Authenticity(String),

    #[error("Checksum mismatch (expected {expected}, got {actual})")]
    Integrity { expected: String, actual: String },

    #[error("Malformed feed: {0}")]
    Structure(String),

    #[error("Failed to replace {path}: {source}")]
    FatalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("All mirrors failed to provide a valid feed ({} attempted)", causes.len())]
    FeedExhausted { causes: Vec<MirrorFailure> },

    #[error("{} file(s) could not be downloaded from any mirror", failures.len())]
    DownloadsExhausted { failures: Vec<FileFailure> },

    #[error("Feed relay error: {0}")]
    Relay(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Coarse classification handed to presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Authenticity,
    Integrity,
    Structure,
    FatalIo,
    Exhausted,
    Cancelled,
    Other,
}

impl UpdateError {
    pub fn kind(&self) -> FailureKind {
        match self {
            UpdateError::Transport(_) | UpdateError::Http(_) => FailureKind::Transport,
            UpdateError::Authenticity(_) => FailureKind::Authenticity,
            UpdateError::Integrity { .. } => FailureKind::Integrity,
            UpdateError::Structure(_) => FailureKind::Structure,
            UpdateError::FatalIo { .. } => FailureKind::FatalIo,
            UpdateError::FeedExhausted { .. } | UpdateError::DownloadsExhausted { .. } => {
                FailureKind::Exhausted
            }
            UpdateError::Cancelled => FailureKind::Cancelled,
            UpdateError::Config(_) | UpdateError::Io(_) | UpdateError::Relay(_) => {
                FailureKind::Other
            }
        }
    }

    /// Flattened cause list, one line per attempted candidate.
    pub fn causes(&self) -> Vec<String> {
        match self {
            UpdateError::FeedExhausted { causes } => {
                causes.iter().map(ToString::to_string).collect()
            }
            UpdateError::DownloadsExhausted { failures } => failures
                .iter()
                .flat_map(|f| {
                    f.causes
                        .iter()
                        .map(move |c| format!("{}: {}", f.path, c))
                })
                .collect(),
            other => vec![other.to_string()],
        }
    }
}

/// Why one mirror was abandoned.
#[derive(Debug)]
pub struct MirrorFailure {
    pub mirror: String,
    pub error: UpdateError,
}

impl fmt::Display for MirrorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.mirror, self.error)
    }
}

/// A file that no mirror could deliver, with one cause per mirror tried.
#[derive(Debug)]
pub struct FileFailure {
    pub path: String,
    pub causes: Vec<MirrorFailure>,
}

pub type Result<T> = std::result::Result<T, UpdateError>;
