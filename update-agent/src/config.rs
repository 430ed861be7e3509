//! Configuration management for the update agent.
//!
//! Loads configuration from a TOML file with `UPDATE_AGENT__*` environment
//! variable overrides (e.g. `UPDATE_AGENT__DOWNLOAD__CONCURRENCY=4`).

use crate::utils::errors::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Allowed range for parallel file downloads.
pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 4;

const ENV_PREFIX: &str = "UPDATE_AGENT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub feed: FeedConfig,
    pub install: InstallConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Mirror origins, highest priority first
    pub mirrors: Vec<String>,

    /// Release channel (path segment below each mirror)
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Connect timeout per request
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout for feed documents
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Installation directory that must match the manifest
    pub root: PathBuf,

    /// Skip local verification entirely (debug only)
    #[serde(default)]
    pub no_verify: bool,

    #[serde(default)]
    pub mode: SessionMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Regular launch-time update
    #[default]
    Update,
    /// User-requested repair; always verifies every file
    Repair,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Parallel file downloads (1-4)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Longest wait for the next chunk of a file body
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Directory for the relay socket (system temp dir when unset)
    #[serde(default)]
    pub socket_dir: Option<PathBuf>,

    /// How long to wait for the client to connect
    #[serde(default = "default_accept_timeout")]
    pub accept_timeout_secs: u64,

    /// How long `stop()` waits for the serving task
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_channel() -> String {
    "release".to_string()
}

fn default_connect_timeout() -> u64 {
    20
}

fn default_request_timeout() -> u64 {
    120
}

fn default_concurrency() -> usize {
    2
}

fn default_read_timeout() -> u64 {
    30
}

fn default_accept_timeout() -> u64 {
    10
}

fn default_shutdown_timeout() -> u64 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            socket_dir: None,
            accept_timeout_secs: default_accept_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            feed: FeedConfig {
                mirrors: Vec::new(),
                channel: default_channel(),
                connect_timeout_secs: default_connect_timeout(),
                request_timeout_secs: default_request_timeout(),
            },
            install: InstallConfig {
                root: PathBuf::from("."),
                no_verify: false,
                mode: SessionMode::Update,
            },
            download: DownloadConfig::default(),
            relay: RelayConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::load(Some(path))
    }

    /// Defaults plus environment overrides only
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&Config::default()).map_err(config_error)?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("feed.mirrors")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_error)?;

        let config: Config = settings.try_deserialize().map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| UpdateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no session could run with
    pub fn validate(&self) -> Result<()> {
        if self.feed.mirrors.is_empty() {
            return Err(UpdateError::Config("at least one mirror is required".into()));
        }
        if self.download.read_timeout_secs == 0 {
            return Err(UpdateError::Config("read_timeout_secs must be positive".into()));
        }
        if self.feed.channel.trim().is_empty() {
            return Err(UpdateError::Config("channel must not be empty".into()));
        }
        for mirror in &self.feed.mirrors {
            let url = reqwest::Url::parse(mirror)
                .map_err(|e| UpdateError::Config(format!("invalid mirror {mirror}: {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(UpdateError::Config(format!(
                    "mirror {mirror} must use http or https"
                )));
            }
        }
        Ok(())
    }

    /// Download concurrency clamped into the supported range
    pub fn concurrency(&self) -> usize {
        self.download
            .concurrency
            .clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
    }

    /// Whether local verification is skipped for this session
    pub fn skip_verification(&self) -> bool {
        self.install.no_verify && self.install.mode != SessionMode::Repair
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.feed.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.feed.request_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.download.read_timeout_secs)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.accept_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.shutdown_timeout_secs)
    }
}

fn config_error(e: config::ConfigError) -> UpdateError {
    UpdateError::Config(e.to_string())
}
