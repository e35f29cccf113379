pub mod config;
pub mod types;

pub use config::{Args, Config};
pub use types::{DownloadConfig, EventConfig, RuntimeConfig, ServerConfig, SessionConfig, StorageConfig};
