use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Launched,
    Running,
    Paused,
    Resumed,
    Stopping,
    Stopped,
    Failed,
}

/// One lifecycle transition of a runner session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub session_id: Uuid,
    pub game_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Time spent past `running`, set on terminal events of sessions that got there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl SessionEvent {
    pub fn new(kind: SessionEventKind, session_id: Uuid, game_id: impl Into<String>) -> Self {
        Self {
            kind,
            session_id,
            game_id: game_id.into(),
            timestamp: Utc::now(),
            detail: None,
            duration_ms: None,
        }
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: Option<u64>) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadEventKind {
    Queued,
    Started,
    Paused,
    Retrying,
    Completed,
    Cancelled,
    Failed,
}

/// One state change of an installer download, keyed by game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadEvent {
    pub kind: DownloadEventKind,
    pub game_id: String,
    pub timestamp: DateTime<Utc>,
    pub bytes_transferred: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DownloadEvent {
    pub fn new(kind: DownloadEventKind, game_id: impl Into<String>, bytes_transferred: u64) -> Self {
        Self {
            kind,
            game_id: game_id.into(),
            timestamp: Utc::now(),
            bytes_transferred,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Event {
    Session(SessionEvent),
    Download(DownloadEvent),
}

impl Event {
    pub fn game_id(&self) -> &str {
        match self {
            Event::Session(e) => &e.game_id,
            Event::Download(e) => &e.game_id,
        }
    }
}

/// An event as stored in the log, with its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub event: Event,
}

/// Per-game aggregates, folded on append so they outlive log eviction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameStats {
    pub launches: u64,
    /// Sessions that reached `running` and have ended.
    pub finished_sessions: u64,
    pub total_play_ms: u64,
    pub errors: u64,
    pub last_session_event: Option<SessionEventKind>,
    pub downloads_completed: u64,
    pub downloads_failed: u64,
    pub bytes_downloaded: u64,
}

impl GameStats {
    pub fn average_duration_ms(&self) -> Option<u64> {
        if self.finished_sessions == 0 {
            None
        } else {
            Some(self.total_play_ms / self.finished_sessions)
        }
    }

    pub(crate) fn fold(&mut self, event: &Event) {
        match event {
            Event::Session(e) => {
                match e.kind {
                    SessionEventKind::Launched => self.launches += 1,
                    SessionEventKind::Failed => self.errors += 1,
                    _ => {}
                }
                if let Some(ms) = e.duration_ms {
                    self.finished_sessions += 1;
                    self.total_play_ms += ms;
                }
                self.last_session_event = Some(e.kind);
            }
            Event::Download(e) => match e.kind {
                DownloadEventKind::Completed => {
                    self.downloads_completed += 1;
                    self.bytes_downloaded += e.bytes_transferred;
                }
                DownloadEventKind::Failed => self.downloads_failed += 1,
                _ => {}
            },
        }
    }
}
