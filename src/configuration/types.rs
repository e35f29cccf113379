use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::container_management::RuntimeKind;
use crate::retry::RetryPolicy;

/// REST surface settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: String::from("127.0.0.1:3080"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the JSON document store.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./playhost-data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub kind: RuntimeKind,
    /// Overrides the runtime executable looked up on `PATH`.
    pub binary: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kind: RuntimeKind::Docker,
            binary: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// A running session silent for longer than this is force-stopped.
    pub heartbeat_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    /// A container start that has not returned by then fails the session.
    pub start_timeout_secs: u64,
    /// Upper bound for container teardown, retries included.
    pub stop_timeout_secs: u64,
    /// How long terminal sessions stay in the live table.
    pub retention_secs: u64,
    pub teardown_attempts: u32,
    pub teardown_backoff_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 60,
            health_check_interval_secs: 5,
            start_timeout_secs: 120,
            stop_timeout_secs: 30,
            retention_secs: 3600,
            teardown_attempts: 3,
            teardown_backoff_ms: 500,
        }
    }
}

impl SessionConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn teardown_policy(&self) -> RetryPolicy {
        let backoff = Duration::from_millis(self.teardown_backoff_ms);
        RetryPolicy::new(self.teardown_attempts, backoff, backoff * 8)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub max_concurrent: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// A transfer that delivers no bytes for this long counts as a failed attempt.
    pub progress_timeout_secs: u64,
    /// Minimum spacing between write-through persists of download progress.
    pub chunk_persist_interval_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            progress_timeout_secs: 30,
            chunk_persist_interval_ms: 1000,
        }
    }
}

impl DownloadConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }

    pub fn progress_timeout(&self) -> Duration {
        Duration::from_secs(self.progress_timeout_secs)
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_persist_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Number of events kept in the in-memory ring buffer.
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}
