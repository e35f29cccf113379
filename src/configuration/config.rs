use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Command-line arguments of the daemon.
///
/// Only a handful of settings can be overridden from the command line; everything
/// else lives in the TOML configuration file.
#[derive(Parser, Debug, Clone)]
#[command(name = "playhost")]
#[command(version)]
#[command(about = "Containerized game runner and installer download daemon")]
pub struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    pub config_file: Option<PathBuf>,

    /// Address the REST surface binds to, e.g. `127.0.0.1:3080`
    ///
    /// # Command Line
    /// Use `--bind-address <ADDRESS>` or the `PLAYHOST_BIND_ADDRESS` variable
    #[arg(long, env = "PLAYHOST_BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Root directory of the document store
    ///
    /// # Command Line
    /// Use `--storage-path <PATH>` or the `PLAYHOST_STORAGE_PATH` variable
    #[arg(long, env = "PLAYHOST_STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// Initial concurrency ceiling for installer downloads
    #[arg(long)]
    pub max_concurrent_downloads: Option<usize>,
}

/// Application configuration structure that defines all runtime parameters.
///
/// The structure is deserialised from a TOML file with `serde`; every section and
/// every field has a default, so an empty file is a valid configuration.
///
/// # Fields Overview
///
/// - `server`: where the REST surface listens and whether it runs at all
/// - `storage`: root directory of the JSON document store
/// - `runtime`: which container runtime CLI drives game containers
/// - `sessions`: heartbeat timeout, health check cadence, teardown bounds, retention
/// - `downloads`: concurrency ceiling, retry policy and progress timeout
/// - `events`: capacity of the in-memory event ring buffer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub runtime: RuntimeConfig,
    pub sessions: SessionConfig,
    pub downloads: DownloadConfig,
    pub events: EventConfig,
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        debug!("Parsed configuration: {:?}", config);
        Ok(config)
    }

    /// Applies command-line overrides on top of the file values.
    pub fn apply_args(&mut self, args: &Args) -> Result<(), ConfigError> {
        if let Some(ref addr) = args.bind_address {
            self.server.bind_address = addr.clone();
        }
        if let Some(ref path) = args.storage_path {
            self.storage.path = path.clone();
        }
        if let Some(n) = args.max_concurrent_downloads {
            self.downloads.max_concurrent = n;
        }
        self.validate()
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .server
            .bind_address
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::InvalidValue(format!(
                "server.bind_address '{}' is not a socket address",
                self.server.bind_address
            )));
        }
        if self.downloads.max_concurrent == 0 {
            return Err(ConfigError::NotInRange(
                "downloads.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.downloads.max_attempts == 0 {
            return Err(ConfigError::NotInRange(
                "downloads.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.downloads.initial_backoff_ms > self.downloads.max_backoff_ms {
            return Err(ConfigError::NotInRange(
                "downloads.initial_backoff_ms exceeds downloads.max_backoff_ms".to_string(),
            ));
        }
        if self.downloads.progress_timeout_secs == 0 {
            return Err(ConfigError::NotInRange(
                "downloads.progress_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.sessions.heartbeat_timeout_secs == 0 {
            return Err(ConfigError::NotInRange(
                "sessions.heartbeat_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.sessions.health_check_interval_secs == 0
            || self.sessions.health_check_interval_secs > self.sessions.heartbeat_timeout_secs
        {
            return Err(ConfigError::NotInRange(
                "sessions.health_check_interval_secs must be between 1 and heartbeat_timeout_secs"
                    .to_string(),
            ));
        }
        if self.sessions.start_timeout_secs == 0 {
            return Err(ConfigError::NotInRange(
                "sessions.start_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.sessions.teardown_attempts == 0 {
            return Err(ConfigError::NotInRange(
                "sessions.teardown_attempts must be at least 1".to_string(),
            ));
        }
        if self.events.capacity == 0 {
            return Err(ConfigError::NotInRange(
                "events.capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
