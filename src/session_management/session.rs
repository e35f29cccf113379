use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::container_management::{ContainerConfiguration, ContainerHandle};
use crate::events::SessionEventKind;
use crate::resolver::SessionMetadata;

/// Lifecycle state of a runner session.
///
/// `starting → running ⇄ paused → stopping → stopped`, and any non-terminal
/// state may fall into `error`. `stopped` and `error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Error)
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Stopped, _) | (Error, _) => false,
            (_, Error) => true,
            (Starting, Running) => true,
            (Running, Paused) | (Paused, Running) => true,
            (Running, Stopping) | (Paused, Stopping) => true,
            (Stopping, Stopped) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Error => "error",
        }
    }

    /// Status a session is left in by an event of `kind`.
    pub fn after_event(kind: SessionEventKind) -> Self {
        match kind {
            SessionEventKind::Launched => SessionStatus::Starting,
            SessionEventKind::Running | SessionEventKind::Resumed => SessionStatus::Running,
            SessionEventKind::Paused => SessionStatus::Paused,
            SessionEventKind::Stopping => SessionStatus::Stopping,
            SessionEventKind::Stopped => SessionStatus::Stopped,
            SessionEventKind::Failed => SessionStatus::Error,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource usage reported by the runner with each heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub gpu_percent: Option<f64>,
    #[serde(default)]
    pub fps: Option<f64>,
}

/// One game launch, from `starting` to a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSession {
    pub id: Uuid,
    pub game_id: String,
    pub status: SessionStatus,
    /// Present iff the session is running, paused or stopping.
    #[serde(default)]
    pub container: Option<ContainerHandle>,
    pub configuration: ContainerConfiguration,
    pub metadata: SessionMetadata,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resources: Option<ResourceSnapshot>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunnerSession {
    pub fn new(
        game_id: impl Into<String>,
        configuration: ContainerConfiguration,
        metadata: SessionMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            game_id: game_id.into(),
            status: SessionStatus::Starting,
            container: None,
            configuration,
            metadata,
            created_at: now,
            start_time: None,
            last_activity: now,
            end_time: None,
            resources: None,
            error: None,
        }
    }

    /// Time between reaching `running` and the end of the session, if both happened.
    pub fn played_ms(&self) -> Option<u64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// Per-game launch statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub game_id: String,
    pub total_launches: u64,
    pub finished_sessions: u64,
    pub average_duration_secs: Option<f64>,
    pub total_play_secs: f64,
    pub error_count: u64,
    pub most_recent_status: Option<SessionStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionStatus::*;

    #[test]
    fn terminal_states_accept_nothing() {
        for next in [Starting, Running, Paused, Stopping, Stopped, Error] {
            assert!(!Stopped.can_transition_to(next));
            assert!(!Error.can_transition_to(next));
        }
    }

    #[test]
    fn lifecycle_edges() {
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Paused.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(Stopping.can_transition_to(Error));

        assert!(!Starting.can_transition_to(Stopping));
        assert!(!Starting.can_transition_to(Paused));
        assert!(!Running.can_transition_to(Stopped));
        assert!(!Stopping.can_transition_to(Running));
    }

    #[test]
    fn played_time_needs_both_ends() {
        let mut session = RunnerSession::new(
            "G1",
            ContainerConfiguration::new("runner:base"),
            SessionMetadata::default(),
        );
        assert_eq!(session.played_ms(), None);

        let start = Utc::now();
        session.start_time = Some(start);
        session.end_time = Some(start + chrono::Duration::milliseconds(2500));
        assert_eq!(session.played_ms(), Some(2500));
    }
}
