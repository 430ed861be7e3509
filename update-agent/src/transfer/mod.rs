//! Download progress accounting and body decoding.

pub mod encoding;
pub mod progress;
pub mod progress_stream;

pub use encoding::ContentEncoding;
pub use progress::{format_speed, DownloadProgress, ProgressSnapshot, ThroughputSampler};
