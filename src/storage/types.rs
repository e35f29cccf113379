use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Document collections known to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Session,
    Download,
    Game,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Session => "session",
            EntityKind::Download => "download",
            EntityKind::Game => "game",
        }
    }

    /// Directory name used by file-backed stores.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Session => "sessions",
            EntityKind::Download => "downloads",
            EntityKind::Game => "games",
        }
    }
}

/// Envelope around every persisted document.
///
/// `version` starts at 1 and is bumped on each write of the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub version: u64,
    pub kind: EntityKind,
    pub id: String,
    pub updated_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayStats {
    #[serde(default)]
    pub last_played: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_play_secs: u64,
    #[serde(default)]
    pub launch_count: u64,
}

/// Library entry for one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub install_path: Option<String>,
    #[serde(default)]
    pub play_stats: PlayStats,
}

impl GameRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            install_path: None,
            play_stats: PlayStats::default(),
        }
    }
}
