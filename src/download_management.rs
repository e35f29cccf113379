//! Installer download engine.
//!
//! [`DownloadManager`] runs a bounded pool of transfers, one per game, fed from a
//! FIFO queue. Payloads come from a [`TransferSource`]; the shipped
//! [`HttpSource`] streams over HTTP(S) and resumes partial files with range requests.

pub mod download;
pub mod download_manager;
pub mod transfer;

pub use download::{Download, DownloadStatus};
pub use download_manager::{DownloadManager, DownloadSettings};
pub use transfer::{HttpSource, TransferBody, TransferSource};
