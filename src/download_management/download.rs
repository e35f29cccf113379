use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Cancelled,
    Error,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Cancelled | DownloadStatus::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "queued",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Cancelled => "cancelled",
            DownloadStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installer download for one game. The game id is the identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Download {
    pub game_id: String,
    pub source_url: String,
    pub target_path: PathBuf,
    pub status: DownloadStatus,
    /// Known once the source has answered.
    #[serde(default)]
    pub total_size: Option<u64>,
    /// Bytes currently on disk for this download.
    #[serde(default)]
    pub bytes_transferred: u64,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Download {
    pub fn new(
        game_id: impl Into<String>,
        source_url: impl Into<String>,
        target_path: impl Into<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            game_id: game_id.into(),
            source_url: source_url.into(),
            target_path: target_path.into(),
            status: DownloadStatus::Queued,
            total_size: None,
            bytes_transferred: 0,
            attempts: 0,
            error: None,
            created_at: now,
            started_at: None,
            updated_at: now,
        }
    }

    /// Completion ratio in `[0, 1]`, when the total size is known.
    pub fn progress(&self) -> Option<f64> {
        match self.total_size {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_transferred as f64 / total as f64).min(1.0)),
            None => None,
        }
    }

    pub fn partial_path(&self) -> PathBuf {
        partial_path(&self.target_path)
    }
}

/// `<target>.part`, where in-flight bytes are written before the final rename.
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_sits_next_to_target() {
        assert_eq!(
            partial_path(Path::new("/games/g2/setup.exe")),
            PathBuf::from("/games/g2/setup.exe.part")
        );
    }

    #[test]
    fn progress_needs_a_known_size() {
        let mut download = Download::new("G2", "https://cdn.example/g2", "/tmp/g2.bin");
        assert_eq!(download.progress(), None);
        download.total_size = Some(200);
        download.bytes_transferred = 50;
        assert_eq!(download.progress(), Some(0.25));
    }

    #[test]
    fn only_finished_states_are_terminal() {
        assert!(!DownloadStatus::Queued.is_terminal());
        assert!(!DownloadStatus::Paused.is_terminal());
        assert!(DownloadStatus::Cancelled.is_terminal());
        assert!(DownloadStatus::Error.is_terminal());
    }
}
