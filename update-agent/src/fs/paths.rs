//! Mapping of manifest paths onto the installation directory.
//!
//! Manifest paths are untrusted input. A path is accepted only if every
//! component is a plain name, so the resolved location always stays strictly
//! inside the install root.

use crate::utils::errors::{Result, UpdateError};
use std::path::{Path, PathBuf};

/// Suffix of in-flight downloads, next to their target.
pub const TEMPORARY_SUFFIX: &str = ".TEMPORARY";

/// Normalise a manifest path to `a/b/c` form or reject it.
pub fn sanitize_relative_path(raw: &str) -> Result<String> {
    let reject = |why: &str| Err(UpdateError::Structure(format!("unsafe path {raw:?}: {why}")));

    if raw.is_empty() {
        return reject("empty");
    }
    if raw.contains('\0') {
        return reject("contains NUL");
    }
    if raw.contains('\\') {
        return reject("contains backslash");
    }
    if raw.starts_with('/') {
        return reject("absolute");
    }

    let mut segments = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return reject("parent traversal"),
            s if s.contains(':') => return reject("drive or stream designator"),
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return reject("no file name");
    }
    Ok(segments.join("/"))
}

/// Filesystem accessor resolving manifest paths to absolute install paths.
#[derive(Debug, Clone)]
pub struct InstallRoot {
    root: PathBuf,
}

impl InstallRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Absolute target for a manifest path.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let clean = sanitize_relative_path(relative)?;
        Ok(clean
            .split('/')
            .fold(self.root.clone(), |acc, segment| acc.join(segment)))
    }
}

/// `<name>.TEMPORARY` in the target's own directory.
pub fn temporary_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(TEMPORARY_SUFFIX);
    target.with_file_name(name)
}
