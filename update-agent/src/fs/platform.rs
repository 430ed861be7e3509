//! Native-library variant detection.
//!
//! Manifests ship native libraries for every platform side by side, under a
//! directory named `natives-<os>` or `natives-<os>-<arch>`. Only the variant
//! matching the running platform is installed.

const NATIVES_PREFIX: &str = "natives-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        }
    }

    /// `true` when `relative_path` is a native variant for another platform.
    pub fn is_foreign_native(&self, relative_path: &str) -> bool {
        relative_path
            .split('/')
            .filter_map(|segment| segment.strip_prefix(NATIVES_PREFIX))
            .any(|target| !self.matches(target))
    }

    fn matches(&self, target: &str) -> bool {
        match target.split_once('-') {
            Some((os, arch)) => os == self.os && arch == self.arch,
            None => target == self.os,
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}
