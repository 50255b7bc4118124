//! Configuration loading for the deploypl fleet poller.
//!
//! The daemon is configured by an INI file whose `[core]` section names the
//! slice, the operator, the seed/data/log directories and the probing knobs.
//! Relative paths are resolved against the invocation directory, so the
//! resolved form must be captured before the daemon chdirs to `/`.

use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use serde::de::{self, Deserializer, Unexpected};
use serde::Deserialize;
use thiserror::Error;

/// Basename of the embedded node store inside `data_dir`.
pub const STORE_BASENAME: &str = "deploypl.sqlite";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// The `[core]` section of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// Remote login slice under which ssh probes run.
    pub slice: String,
    /// Local operator name, also used as the remote working subdirectory.
    pub user: String,
    /// Directory holding the seed file.
    pub nodes_dir: PathBuf,
    /// Directory holding the persisted node store.
    pub data_dir: PathBuf,
    /// Directory receiving the daemon log.
    pub log_dir: PathBuf,
    /// Basename of the seed file within `nodes_dir`.
    pub raw_nodes: String,
    /// Fan-out cap for the ping stage.
    pub thread_limit: usize,
    /// Fan-out cap for the ssh stages.
    pub ssh_limit: usize,
    /// Private key used for ssh probes.
    pub ssh_keyloc: PathBuf,
    /// Seconds between probing cycles.
    pub probing_period: u64,
    /// Whether to sleep one full period before the first cycle.
    #[serde(deserialize_with = "yes_no")]
    pub initial_delay: bool,
}

/// Whole configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    pub core: CoreConfig,
}

impl DaemonConfig {
    /// Parse the INI file at `path`. Missing sections, missing keys and
    /// unparseable integers all surface as [`ConfigError::Invalid`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini))
            .build()?;
        Ok(raw.try_deserialize()?)
    }

    /// Resolve every configured path against `base` (the invocation
    /// directory). Absolute paths are kept as-is.
    pub fn resolved(mut self, base: &Path) -> Self {
        for dir in [
            &mut self.core.nodes_dir,
            &mut self.core.data_dir,
            &mut self.core.log_dir,
            &mut self.core.ssh_keyloc,
        ] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        self
    }

    /// Full path of the seed file.
    pub fn seed_file(&self) -> PathBuf {
        self.core.nodes_dir.join(&self.core.raw_nodes)
    }

    /// Full path of the embedded node store.
    pub fn store_file(&self) -> PathBuf {
        self.core.data_dir.join(STORE_BASENAME)
    }

    /// Full path of the daemon log for a given basename.
    pub fn log_file(&self, basename: &str) -> PathBuf {
        self.core.log_dir.join(basename)
    }
}

fn yes_no<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Ok(true),
        "no" | "false" | "0" | "off" => Ok(false),
        other => Err(de::Error::invalid_value(
            Unexpected::Str(other),
            &"yes or no",
        )),
    }
}
