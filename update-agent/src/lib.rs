//! Update Agent Library
//!
//! Keeps an installation in line with a signed remote feed: fetches and
//! verifies the feed from prioritised mirrors, reconciles it against the
//! install tree, downloads what differs and hands the verified feed to the
//! launched client over a private local socket.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod feed;
pub mod fs;
pub mod reconcile;
#[cfg(unix)]
pub mod relay;
pub mod session;
pub mod sink;
pub mod transfer;
pub mod utils;
pub mod verify;

// Re-export commonly used types
pub use config::{Config, SessionMode};
pub use executor::{DownloadExecutor, ExecutionReport};
pub use feed::{FeedDocuments, FetchedFeed, Manifest, ManifestEntry};
pub use reconcile::{DownloadPlan, Reconciler};
pub use session::{SessionOutcome, UpdateSession};
pub use sink::{BroadcastSink, LogSink, ProgressSink};
pub use utils::errors::{FailureKind, UpdateError};
pub use verify::FeedVerifier;
pub type Result<T> = std::result::Result<T, UpdateError>;
