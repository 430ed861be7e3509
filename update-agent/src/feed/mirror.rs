//! Mirror origins and the URL layout below them.
//!
//! ```text
//! {mirror}/{channel}/current/feeds/{main_feed|update_feed}.{txt|sig256}
//! {mirror}/{channel}/current/client/{relative path}?v={checksum[..8]}
//! ```

use super::ManifestEntry;
use crate::utils::errors::{Result, UpdateError};
use reqwest::{Client, Url};
use std::fmt;
use std::time::Duration;

const USER_AGENT: &str = concat!("update-agent/", env!("CARGO_PKG_VERSION"));

/// Which of the two feed documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Main,
    Update,
}

impl FeedKind {
    fn stem(self) -> &'static str {
        match self {
            FeedKind::Main => "main_feed",
            FeedKind::Update => "update_feed",
        }
    }
}

/// One origin, identified by its position in the priority list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    index: usize,
    base: Url,
}

impl Mirror {
    pub fn new(index: usize, origin: &str) -> Result<Self> {
        let base = Url::parse(origin)
            .map_err(|e| UpdateError::Config(format!("invalid mirror {origin}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(UpdateError::Config(format!("invalid mirror {origin}")));
        }
        Ok(Self { index, base })
    }

    /// Priority position, 0 = preferred.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn feed_url(&self, channel: &str, kind: FeedKind) -> Url {
        let name = format!("{}.txt", kind.stem());
        self.join([channel, "current", "feeds", name.as_str()])
    }

    pub fn signature_url(&self, channel: &str, kind: FeedKind) -> Url {
        let name = format!("{}.sig256", kind.stem());
        self.join([channel, "current", "feeds", name.as_str()])
    }

    pub fn file_url(&self, channel: &str, entry: &ManifestEntry) -> Url {
        let mut url = self.join(
            [channel, "current", "client"]
                .into_iter()
                .chain(entry.relative_path.split('/')),
        );
        url.query_pairs_mut().append_pair("v", entry.version_tag());
        url
    }

    fn join<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

impl fmt::Display for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base.as_str().trim_end_matches('/'))
    }
}

/// Mirrors in configured priority order.
pub fn parse_mirrors(origins: &[String]) -> Result<Vec<Mirror>> {
    origins
        .iter()
        .enumerate()
        .map(|(index, origin)| Mirror::new(index, origin))
        .collect()
}

/// Shared HTTP client with the per-request connect timeout.
pub fn http_client(connect_timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(USER_AGENT)
        .build()?)
}
