use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::events::GameStats;
use crate::resolver::LaunchRequest;
use crate::session_management::SessionStats;

/// API error payload
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

/// Body of `POST /sessions`.
#[derive(Debug, Deserialize)]
pub struct LaunchBody {
    pub game_id: String,
    #[serde(flatten)]
    pub request: LaunchRequest,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LaunchResponse {
    pub session_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub game_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GameStatsResponse {
    pub sessions: SessionStats,
    pub downloads_completed: u64,
    pub downloads_failed: u64,
    pub bytes_downloaded: u64,
}

impl GameStatsResponse {
    pub fn new(sessions: SessionStats, aggregates: &GameStats) -> Self {
        Self {
            sessions,
            downloads_completed: aggregates.downloads_completed,
            downloads_failed: aggregates.downloads_failed,
            bytes_downloaded: aggregates.bytes_downloaded,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GameSearchQuery {
    #[serde(default)]
    pub q: String,
    pub scraper: Option<String>,
}

/// Body of `POST /downloads`.
#[derive(Debug, Deserialize)]
pub struct EnqueueBody {
    pub game_id: String,
    pub url: String,
    pub target_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConcurrencyBody {
    pub max_concurrent: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConcurrencyResponse {
    pub max_concurrent: usize,
    pub active: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: u64,
}
