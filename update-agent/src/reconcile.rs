//! Installation reconciliation.
//!
//! Compares the local install tree against a manifest and produces the
//! minimal set of files that must be downloaded. Change detection is by
//! SHA-256 content checksum; sizes and timestamps are never trusted.

use crate::feed::{Manifest, ManifestEntry};
use crate::fs::checksum::{checksums_match, sha256_file};
use crate::fs::{InstallRoot, Platform};
use crate::utils::errors::{Result, UpdateError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A manifest entry that needs transferring, with its absolute target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub entry: ManifestEntry,
    pub target: PathBuf,
}

/// Ordered subset of manifest entries that must be downloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadPlan {
    files: Vec<PlannedFile>,
}

impl DownloadPlan {
    pub fn new(files: Vec<PlannedFile>) -> Self {
        Self { files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn files(&self) -> &[PlannedFile] {
        &self.files
    }

    pub fn into_files(self) -> Vec<PlannedFile> {
        self.files
    }

    /// Sum of plausible declared sizes, used as the progress denominator.
    pub fn estimated_bytes(&self) -> u64 {
        self.files
            .iter()
            .filter_map(|f| f.entry.estimated_size())
            .sum()
    }
}

/// Why an entry was or wasn't planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    ForeignNative,
    KeepExisting,
    Missing,
    Modified,
    UpToDate,
}

/// Decide, per manifest entry, whether it must be downloaded.
pub struct Reconciler {
    root: InstallRoot,
    platform: Platform,
}

impl Reconciler {
    pub fn new(root: InstallRoot) -> Self {
        Self {
            root,
            platform: Platform::current(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Build the download plan. `no_verify` short-circuits to an empty plan.
    pub fn plan(&self, manifest: &Manifest, no_verify: bool) -> Result<DownloadPlan> {
        if no_verify {
            warn!("Local verification disabled, skipping reconciliation");
            return Ok(DownloadPlan::default());
        }

        let mut files = Vec::new();
        let mut up_to_date = 0usize;
        let mut skipped = 0usize;

        for entry in manifest.entries() {
            let target = self.root.resolve(&entry.relative_path)?;
            match self.decide(entry, &target) {
                Decision::Missing | Decision::Modified => files.push(PlannedFile {
                    entry: entry.clone(),
                    target,
                }),
                Decision::UpToDate => up_to_date += 1,
                Decision::ForeignNative | Decision::KeepExisting => skipped += 1,
            }
        }

        info!(
            "Reconciliation: {} to download, {} up to date, {} skipped",
            files.len(),
            up_to_date,
            skipped
        );

        Ok(DownloadPlan::new(files))
    }

    /// [`Reconciler::plan`] on the blocking pool; hashing is disk-bound.
    pub async fn plan_async(self, manifest: Manifest, no_verify: bool) -> Result<DownloadPlan> {
        tokio::task::spawn_blocking(move || self.plan(&manifest, no_verify))
            .await
            .map_err(|e| UpdateError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    fn decide(&self, entry: &ManifestEntry, target: &Path) -> Decision {
        if self.platform.is_foreign_native(&entry.relative_path) {
            return Decision::ForeignNative;
        }

        let exists = target.is_file();
        if entry.create_only_if_absent && exists {
            return Decision::KeepExisting;
        }
        if !exists {
            debug!("{} is missing", entry.relative_path);
            return Decision::Missing;
        }

        match sha256_file(target) {
            Ok(actual) if checksums_match(&entry.checksum, &actual) => Decision::UpToDate,
            Ok(actual) => {
                debug!(
                    "{} differs (expected {}, found {})",
                    entry.relative_path, entry.checksum, actual
                );
                Decision::Modified
            }
            Err(e) => {
                warn!("Cannot hash {}: {}, scheduling download", target.display(), e);
                Decision::Modified
            }
        }
    }
}

/// Convenience wrapper: plan `manifest` against `install_root`.
pub fn plan(manifest: &Manifest, install_root: &InstallRoot, no_verify: bool) -> Result<DownloadPlan> {
    Reconciler::new(install_root.clone()).plan(manifest, no_verify)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::test_support::checksum;
    use crate::fs::checksum::sha256_bytes;
    use std::fs;
    use tempfile::TempDir;

    const LINUX_X64: Platform = Platform {
        os: "linux",
        arch: "x86_64",
    };

    fn entry(path: &str, checksum: &str, only_if_absent: bool) -> ManifestEntry {
        ManifestEntry {
            relative_path: path.to_string(),
            checksum: checksum.to_string(),
            declared_size: Some(4),
            create_only_if_absent: only_if_absent,
        }
    }

    fn reconciler(dir: &TempDir) -> Reconciler {
        Reconciler::new(InstallRoot::new(dir.path())).with_platform(LINUX_X64)
    }

    #[test]
    fn test_all_matching_yields_empty_plan() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/a.jar"), b"aaaa").unwrap();
        fs::write(dir.path().join("b.bin"), b"bbbb").unwrap();

        let manifest = Manifest::new(
            None,
            vec![
                entry("lib/a.jar", &sha256_bytes(b"aaaa"), false),
                // mixed-case published checksum still matches
                entry("b.bin", &sha256_bytes(b"bbbb").to_ascii_uppercase(), false),
            ],
        );

        let plan = reconciler(&dir).plan(&manifest, false).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_missing_and_modified_are_planned_in_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("stale.bin"), b"old!").unwrap();
        fs::write(dir.path().join("ok.bin"), b"good").unwrap();

        let manifest = Manifest::new(
            None,
            vec![
                entry("stale.bin", &sha256_bytes(b"new!"), false),
                entry("ok.bin", &sha256_bytes(b"good"), false),
                entry("client/data.bin", &checksum('a'), false),
            ],
        );

        let plan = reconciler(&dir).plan(&manifest, false).unwrap();
        let paths: Vec<_> = plan
            .files()
            .iter()
            .map(|f| f.entry.relative_path.as_str())
            .collect();
        assert_eq!(paths, ["stale.bin", "client/data.bin"]);
        assert_eq!(plan.files()[1].target, dir.path().join("client").join("data.bin"));
        assert_eq!(plan.estimated_bytes(), 8);
    }

    #[test]
    fn test_create_only_if_absent_never_reverified() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("user.ini"), b"user edits").unwrap();

        let manifest = Manifest::new(
            None,
            vec![
                entry("user.ini", &checksum('f'), true),
                entry("fresh.ini", &checksum('e'), true),
            ],
        );

        let plan = reconciler(&dir).plan(&manifest, false).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.files()[0].entry.relative_path, "fresh.ini");
    }

    #[test]
    fn test_foreign_natives_are_skipped() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::new(
            None,
            vec![
                entry("lib/natives-windows/gl.dll", &checksum('1'), false),
                entry("lib/natives-linux-x86_64/libgl.so", &checksum('2'), false),
            ],
        );

        let plan = reconciler(&dir).plan(&manifest, false).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.files()[0].entry.relative_path, "lib/natives-linux-x86_64/libgl.so");
    }

    #[test]
    fn test_no_verify_override_returns_empty_plan() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::new(None, vec![entry("missing.bin", &checksum('a'), false)]);

        assert!(reconciler(&dir).plan(&manifest, true).unwrap().is_empty());
        assert_eq!(
            plan(&manifest, &InstallRoot::new(dir.path()), false).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_plan_async_matches_sync() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::new(None, vec![entry("a.bin", &checksum('a'), false)]);

        let plan = reconciler(&dir).plan_async(manifest, false).await.unwrap();
        assert_eq!(plan.len(), 1);
    }
}
