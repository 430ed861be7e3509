//! Signed feed documents and the manifest built from them.
//!
//! Two XML documents describe a release:
//!
//! ```xml
//! <main_feed>
//!   <min_revision>1042</min_revision>
//! </main_feed>
//!
//! <update_feed>
//!   <file name="client/data.bin" sha256="…64 hex…" size="1024"/>
//!   <file name="config/user.ini" sha256="…" only_if_not_exists="true"/>
//! </update_feed>
//! ```
//!
//! Each document has its own detached signature. A manifest is only built
//! from documents whose signatures both verified, and any malformed or unsafe
//! entry discards the whole manifest.

pub mod fetcher;
pub mod mirror;

use crate::fs::paths::sanitize_relative_path;
use crate::utils::errors::{Result, UpdateError};
use bytes::Bytes;
use serde::Serialize;

/// Upper bound for a declared size to count towards progress estimation.
pub const MAX_DECLARED_SIZE: i64 = 500 * 1024 * 1024;

const MAIN_FEED_ROOT: &str = "main_feed";
const UPDATE_FEED_ROOT: &str = "update_feed";
const CHECKSUM_HEX_LEN: usize = 64;

/// One file the installation must contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    /// Sanitised `a/b/c` path below the install root
    pub relative_path: String,
    /// Expected SHA-256, hex as published (case preserved)
    pub checksum: String,
    /// Size as published; may be absent, zero or out of range
    pub declared_size: Option<i64>,
    /// Installed once and never repaired afterwards
    pub create_only_if_absent: bool,
}

impl ManifestEntry {
    /// Size usable for progress estimation, if the declared one is plausible.
    pub fn estimated_size(&self) -> Option<u64> {
        self.declared_size
            .filter(|size| (1..=MAX_DECLARED_SIZE).contains(size))
            .map(|size| size as u64)
    }

    /// Cache-busting tag appended to file URLs.
    pub fn version_tag(&self) -> &str {
        self.checksum.get(..8).unwrap_or(&self.checksum)
    }
}

/// Immutable description of a release, built once per successful fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    min_revision: Option<i64>,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(min_revision: Option<i64>, entries: Vec<ManifestEntry>) -> Self {
        Self {
            min_revision,
            entries,
        }
    }

    /// Parse both feed documents. Signatures must already be verified.
    pub fn from_feeds(main_feed: &[u8], update_feed: &[u8]) -> Result<Self> {
        let min_revision = parse_main_feed(main_feed)?;
        let entries = parse_update_feed(update_feed)?;

        if entries.iter().all(|e| e.create_only_if_absent) {
            return Err(UpdateError::Structure(
                "update feed has no entries that are always installed".into(),
            ));
        }

        Ok(Self::new(min_revision, entries))
    }

    pub fn min_revision(&self) -> Option<i64> {
        self.min_revision
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Whether a client at `current_revision` is older than the feed allows.
    pub fn requires_client_update(&self, current_revision: i64) -> bool {
        self.min_revision
            .is_some_and(|min_revision| current_revision < min_revision)
    }
}

/// Raw verified documents and signatures, kept for the feed relay.
#[derive(Debug, Clone)]
pub struct FeedDocuments {
    pub main_feed: Bytes,
    pub main_signature: Bytes,
    pub update_feed: Bytes,
    pub update_signature: Bytes,
}

/// Outcome of a successful fetch: the winning mirror, its manifest, and the
/// exact bytes that were verified.
#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub mirror: String,
    pub manifest: Manifest,
    pub documents: FeedDocuments,
}

fn parse_document<'a>(bytes: &'a [u8], root_name: &str) -> Result<roxmltree::Document<'a>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| UpdateError::Structure(format!("{root_name} is not UTF-8: {e}")))?;
    let doc = roxmltree::Document::parse(text)
        .map_err(|e| UpdateError::Structure(format!("{root_name}: {e}")))?;

    let actual = doc.root_element().tag_name().name();
    if actual != root_name {
        return Err(UpdateError::Structure(format!(
            "expected <{root_name}> root, found <{actual}>"
        )));
    }
    Ok(doc)
}

/// Optional `<min_revision>` of the main feed.
pub fn parse_main_feed(bytes: &[u8]) -> Result<Option<i64>> {
    let doc = parse_document(bytes, MAIN_FEED_ROOT)?;

    let Some(node) = doc
        .root_element()
        .children()
        .find(|n| n.has_tag_name("min_revision"))
    else {
        return Ok(None);
    };

    let text = node.text().unwrap_or("").trim();
    text.parse::<i64>()
        .map(Some)
        .map_err(|_| UpdateError::Structure(format!("invalid min_revision {text:?}")))
}

/// All `<file>` entries of the update feed, in document order.
pub fn parse_update_feed(bytes: &[u8]) -> Result<Vec<ManifestEntry>> {
    let doc = parse_document(bytes, UPDATE_FEED_ROOT)?;

    doc.root_element()
        .children()
        .filter(|n| n.has_tag_name("file"))
        .map(|node| {
            let name = node
                .attribute("name")
                .ok_or_else(|| UpdateError::Structure("file entry without name".into()))?;
            let relative_path = sanitize_relative_path(name)?;

            let checksum = node.attribute("sha256").ok_or_else(|| {
                UpdateError::Structure(format!("{relative_path}: missing sha256"))
            })?;
            if checksum.len() != CHECKSUM_HEX_LEN
                || !checksum.bytes().all(|b| b.is_ascii_hexdigit())
            {
                return Err(UpdateError::Structure(format!(
                    "{relative_path}: invalid sha256 {checksum:?}"
                )));
            }

            let declared_size = node
                .attribute("size")
                .map(|raw| {
                    raw.trim().parse::<i64>().map_err(|_| {
                        UpdateError::Structure(format!("{relative_path}: invalid size {raw:?}"))
                    })
                })
                .transpose()?;

            let create_only_if_absent = node
                .attribute("only_if_not_exists")
                .map(|raw| parse_flag(raw, &relative_path))
                .transpose()?
                .unwrap_or(false);

            Ok(ManifestEntry {
                relative_path,
                checksum: checksum.to_string(),
                declared_size,
                create_only_if_absent,
            })
        })
        .collect()
}

fn parse_flag(raw: &str, relative_path: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(UpdateError::Structure(format!(
            "{relative_path}: invalid only_if_not_exists {raw:?}"
        ))),
    }
}
