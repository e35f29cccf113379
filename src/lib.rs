pub mod configuration;
pub mod container_management;
pub mod controller;
pub mod download_management;
pub mod error_handling;
pub mod events;
pub mod resolver;
pub mod retry;
pub mod scraper;
pub mod session_management;
pub mod storage;
pub mod web_interface;

pub use controller::Controller;
pub use download_management::{Download, DownloadManager, DownloadStatus};
pub use session_management::{RunnerSession, SessionManager, SessionStatus};
