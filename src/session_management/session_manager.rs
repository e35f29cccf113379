use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::configuration::SessionConfig;
use crate::container_management::{ContainerHandle, ContainerState, Launcher};
use crate::error_handling::types::{LaunchError, SessionError, StorageError};
use crate::events::{EventSink, SessionEvent, SessionEventKind};
use crate::resolver::{LaunchRequest, ResourceResolver};
use crate::retry::RetryPolicy;
use crate::session_management::session::{
    ResourceSnapshot, RunnerSession, SessionStats, SessionStatus,
};
use crate::storage::{self, EntityKind, Storage};

/// Timing knobs of the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub heartbeat_timeout: Duration,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    pub retention: Duration,
    pub teardown: RetryPolicy,
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            heartbeat_timeout: config.heartbeat_timeout(),
            start_timeout: config.start_timeout(),
            stop_timeout: config.stop_timeout(),
            retention: config.retention(),
            teardown: config.teardown_policy(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

struct SessionEntry {
    session: RunnerSession,
    last_heartbeat: Instant,
    /// Set when `stop` arrives while the container is still being started.
    stop_requested: bool,
}

type SessionSlot = Arc<Mutex<SessionEntry>>;

struct Shared {
    sessions: RwLock<HashMap<Uuid, SessionSlot>>,
    /// Game id -> its single non-terminal session. Never held across an await.
    active_games: StdMutex<HashMap<String, Uuid>>,
    launcher: Arc<dyn Launcher>,
    resolver: ResourceResolver,
    storage: Arc<dyn Storage>,
    events: Arc<EventSink>,
    settings: SessionSettings,
}

/// Owns every runner session and drives it through its lifecycle.
///
/// # Locking
///
/// - The session table lock is only held to insert, look up or prune slots.
/// - Each session has its own async mutex; every transition happens under it.
/// - `active_games` makes the one-live-session-per-game check atomic. It is
///   taken after a session lock, never before one.
///
/// Container start and teardown run on spawned tasks, so `launch` and `stop`
/// return as soon as the request is accepted.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    monitor: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl SessionManager {
    pub fn new(
        launcher: Arc<dyn Launcher>,
        resolver: ResourceResolver,
        storage: Arc<dyn Storage>,
        events: Arc<EventSink>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                sessions: RwLock::new(HashMap::new()),
                active_games: StdMutex::new(HashMap::new()),
                launcher,
                resolver,
                storage,
                events,
                settings,
            }),
            cancel: CancellationToken::new(),
            monitor: Arc::new(StdMutex::new(None)),
        }
    }

    /// Starts a session for `game_id` and returns its id without waiting for the container.
    pub async fn launch(
        &self,
        game_id: &str,
        request: LaunchRequest,
    ) -> Result<Uuid, SessionError> {
        let configuration = self.shared.resolver.resolve(game_id, &request)?;
        let session = RunnerSession::new(game_id, configuration, request.metadata());
        let session_id = session.id;

        {
            let mut games = self.shared.lock_games();
            if let Some(existing) = games.get(game_id) {
                warn!("[{}] Launch of {} refused, session {} is live", session_id, game_id, existing);
                return Err(SessionError::Conflict(game_id.to_string()));
            }
            games.insert(game_id.to_string(), session_id);
        }

        if let Err(e) = self.shared.persist(&session) {
            error!("[{}] Failed to persist new session: {}", session_id, e);
            self.shared.release_game(game_id, session_id);
            return Err(e.into());
        }

        let slot = Arc::new(Mutex::new(SessionEntry {
            session,
            last_heartbeat: Instant::now(),
            stop_requested: false,
        }));
        self.shared
            .sessions
            .write()
            .await
            .insert(session_id, slot.clone());
        self.shared.events.record_session(SessionEvent::new(
            SessionEventKind::Launched,
            session_id,
            game_id,
        ));
        info!("[{}] Launching {}", session_id, game_id);

        let shared = self.shared.clone();
        tokio::spawn(async move { shared.run_launch(slot).await });
        Ok(session_id)
    }

    /// Requests teardown. Stopping a session that is already stopping or has ended is a no-op.
    pub async fn stop(&self, session_id: Uuid) -> Result<(), SessionError> {
        let slot = self.shared.slot(session_id).await?;
        let mut entry = slot.lock().await;
        match entry.session.status {
            SessionStatus::Stopping | SessionStatus::Stopped | SessionStatus::Error => {
                debug!("[{}] Stop ignored in state {}", session_id, entry.session.status);
                Ok(())
            }
            SessionStatus::Starting => {
                info!("[{}] Stop requested while starting, deferring", session_id);
                entry.stop_requested = true;
                Ok(())
            }
            SessionStatus::Running | SessionStatus::Paused => {
                self.shared
                    .transition(&mut entry, SessionStatus::Stopping, None)?;
                drop(entry);
                self.shared.spawn_teardown(slot);
                Ok(())
            }
        }
    }

    pub async fn pause(&self, session_id: Uuid) -> Result<(), SessionError> {
        self.toggle(session_id, SessionStatus::Running, SessionStatus::Paused, "pause")
            .await
    }

    pub async fn resume(&self, session_id: Uuid) -> Result<(), SessionError> {
        self.toggle(session_id, SessionStatus::Paused, SessionStatus::Running, "resume")
            .await
    }

    async fn toggle(
        &self,
        session_id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
        operation: &str,
    ) -> Result<(), SessionError> {
        let slot = self.shared.slot(session_id).await?;
        let mut entry = slot.lock().await;
        if entry.session.status != from {
            return Err(SessionError::InvalidState {
                operation: operation.to_string(),
                status: entry.session.status.to_string(),
            });
        }
        if to == SessionStatus::Running {
            // Time spent paused does not count towards the stall timeout.
            entry.last_heartbeat = Instant::now();
        }
        self.shared.transition(&mut entry, to, None)
    }

    /// Records liveness and the latest resource usage of a running or paused session.
    pub async fn heartbeat(
        &self,
        session_id: Uuid,
        snapshot: ResourceSnapshot,
    ) -> Result<(), SessionError> {
        let slot = self.shared.slot(session_id).await?;
        let mut entry = slot.lock().await;
        match entry.session.status {
            SessionStatus::Running | SessionStatus::Paused => {}
            status => {
                return Err(SessionError::InvalidState {
                    operation: "heartbeat".to_string(),
                    status: status.to_string(),
                })
            }
        }
        entry.session.resources = Some(snapshot);
        entry.session.last_activity = Utc::now();
        entry.last_heartbeat = Instant::now();
        debug!("[{}] Heartbeat", session_id);
        Ok(())
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<RunnerSession, SessionError> {
        let slot = self.shared.slot(session_id).await?;
        let entry = slot.lock().await;
        Ok(entry.session.clone())
    }

    /// Sessions of one game still in the live table, oldest first.
    pub async fn get_sessions(&self, game_id: &str) -> Vec<RunnerSession> {
        let mut sessions = self.list_sessions().await;
        sessions.retain(|s| s.game_id == game_id);
        sessions
    }

    pub async fn list_sessions(&self) -> Vec<RunnerSession> {
        let mut sessions = Vec::new();
        for slot in self.shared.all_slots().await {
            sessions.push(slot.lock().await.session.clone());
        }
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub async fn get_stats(&self, game_id: &str) -> SessionStats {
        let aggregates = self.shared.events.game_stats(game_id);
        let most_recent_status = self
            .get_sessions(game_id)
            .await
            .last()
            .map(|s| s.status)
            .or(aggregates.last_session_event.map(SessionStatus::after_event));

        SessionStats {
            game_id: game_id.to_string(),
            total_launches: aggregates.launches,
            finished_sessions: aggregates.finished_sessions,
            average_duration_secs: aggregates
                .average_duration_ms()
                .map(|ms| ms as f64 / 1000.0),
            total_play_secs: aggregates.total_play_ms as f64 / 1000.0,
            error_count: aggregates.errors,
            most_recent_status,
        }
    }

    /// One pass of the health check over running sessions.
    ///
    /// A session whose heartbeat is older than the timeout, or whose container
    /// has exited, is moved to `stopping` and torn down. Returns those sessions.
    pub async fn check_health(&self) -> Vec<Uuid> {
        let timeout = self.shared.settings.heartbeat_timeout;
        let mut stopped = Vec::new();

        for slot in self.shared.all_slots().await {
            let (session_id, handle) = {
                let mut entry = slot.lock().await;
                if entry.session.status != SessionStatus::Running {
                    continue;
                }
                let session_id = entry.session.id;
                let silent = entry.last_heartbeat.elapsed();
                if silent > timeout {
                    let detail = format!("stalled: no heartbeat for {}ms", silent.as_millis());
                    warn!("[{}] Session {}", session_id, detail);
                    if self
                        .shared
                        .transition(&mut entry, SessionStatus::Stopping, Some(detail))
                        .is_ok()
                    {
                        drop(entry);
                        self.shared.spawn_teardown(slot.clone());
                        stopped.push(session_id);
                    }
                    continue;
                }
                match entry.session.container.clone() {
                    Some(handle) => (session_id, handle),
                    None => continue,
                }
            };

            match self.shared.launcher.inspect(&handle).await {
                Ok(ContainerState::Exited) | Ok(ContainerState::Missing) => {
                    let mut entry = slot.lock().await;
                    if entry.session.status != SessionStatus::Running
                        || entry.session.container.as_ref() != Some(&handle)
                    {
                        continue;
                    }
                    info!("[{}] Container {} is gone", session_id, handle.name);
                    if self
                        .shared
                        .transition(
                            &mut entry,
                            SessionStatus::Stopping,
                            Some("container exited".to_string()),
                        )
                        .is_ok()
                    {
                        drop(entry);
                        self.shared.spawn_teardown(slot.clone());
                        stopped.push(session_id);
                    }
                }
                Ok(state) => debug!("[{}] Container state {:?}", session_id, state),
                Err(e) => warn!("[{}] Health inspect failed: {}", session_id, e),
            }
        }
        stopped
    }

    /// Drops terminal sessions older than the retention window from the live table.
    ///
    /// Their persisted records are kept.
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let retention = chrono::Duration::from_std(self.shared.settings.retention)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let cutoff = Utc::now() - retention;

        let mut sessions = self.shared.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, slot| match slot.try_lock() {
            Ok(entry) => {
                let expired = entry.session.status.is_terminal()
                    && entry.session.end_time.map(|t| t <= cutoff).unwrap_or(false);
                !expired
            }
            Err(_) => true,
        });
        let removed = before - sessions.len();
        if removed > 0 {
            info!("Removed {} expired session(s) from the live table", removed);
        }
        removed
    }

    /// Starts the background health/retention loop. Calling it twice has no effect.
    pub fn spawn_monitor(&self, interval: Duration) {
        let mut monitor = self.monitor.lock().unwrap_or_else(|p| p.into_inner());
        if monitor.is_some() {
            debug!("Session monitor already running");
            return;
        }
        let manager = self.clone();
        let token = self.cancel.clone();
        *monitor = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let stalled = manager.check_health().await;
                        if !stalled.is_empty() {
                            info!("Health check stopped {} session(s)", stalled.len());
                        }
                        manager.cleanup_expired_sessions().await;
                    }
                }
            }
            debug!("Session monitor exited");
        }));
        info!("Session monitor started (every {:?})", interval);
    }

    /// Stops the monitor and tears down every live session, waiting up to the stop timeout.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.cancel.cancel();
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = monitor {
            let _ = handle.await;
        }

        for session in self.list_sessions().await {
            if !session.status.is_terminal() {
                if let Err(e) = self.stop(session.id).await {
                    warn!("[{}] Stop during shutdown failed: {}", session.id, e);
                }
            }
        }

        let deadline = Instant::now() + self.shared.settings.stop_timeout + Duration::from_secs(1);
        loop {
            let live = self
                .list_sessions()
                .await
                .iter()
                .filter(|s| !s.status.is_terminal())
                .count();
            if live == 0 {
                info!("All sessions stopped");
                return Ok(());
            }
            if Instant::now() >= deadline {
                error!("{} session(s) still live at shutdown", live);
                return Err(SessionError::Timeout(format!(
                    "{} session(s) did not stop",
                    live
                )));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Shared {
    fn lock_games(&self) -> MutexGuard<'_, HashMap<String, Uuid>> {
        self.active_games.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn release_game(&self, game_id: &str, session_id: Uuid) {
        let mut games = self.lock_games();
        if games.get(game_id) == Some(&session_id) {
            games.remove(game_id);
        }
    }

    async fn slot(&self, session_id: Uuid) -> Result<SessionSlot, SessionError> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    async fn all_slots(&self) -> Vec<SessionSlot> {
        self.sessions.read().await.values().cloned().collect()
    }

    fn persist(&self, session: &RunnerSession) -> Result<(), StorageError> {
        storage::save_record(
            self.storage.as_ref(),
            EntityKind::Session,
            &session.id.to_string(),
            session,
        )
    }

    /// Applies one state change, then writes it through and emits its event.
    fn transition(
        &self,
        entry: &mut SessionEntry,
        next: SessionStatus,
        detail: Option<String>,
    ) -> Result<(), SessionError> {
        let current = entry.session.status;
        if !current.can_transition_to(next) {
            return Err(SessionError::InvalidState {
                operation: next.to_string(),
                status: current.to_string(),
            });
        }

        let now = Utc::now();
        let session = &mut entry.session;
        session.status = next;
        session.last_activity = now;
        let kind = match next {
            SessionStatus::Starting => SessionEventKind::Launched,
            SessionStatus::Running if current == SessionStatus::Paused => SessionEventKind::Resumed,
            SessionStatus::Running => {
                session.start_time = Some(now);
                SessionEventKind::Running
            }
            SessionStatus::Paused => SessionEventKind::Paused,
            SessionStatus::Stopping => SessionEventKind::Stopping,
            SessionStatus::Stopped => SessionEventKind::Stopped,
            SessionStatus::Error => SessionEventKind::Failed,
        };
        if next == SessionStatus::Error {
            session.error = detail.clone();
        }

        let mut duration_ms = None;
        if next.is_terminal() {
            session.end_time = Some(now);
            session.container = None;
            duration_ms = session.played_ms();
            self.release_game(&session.game_id, session.id);
            if let Some(started) = session.start_time {
                if let Err(e) = storage::record_play(self.storage.as_ref(), &session.game_id, started, now) {
                    warn!("[{}] Failed to update play stats: {}", session.id, e);
                }
            }
        }

        if let Err(e) = self.persist(session) {
            warn!("[{}] Failed to persist {} state: {}", session.id, next, e);
        }
        info!("[{}] {} -> {}", session.id, current, next);
        self.events.record_session(
            SessionEvent::new(kind, session.id, session.game_id.clone())
                .with_detail(detail)
                .with_duration_ms(duration_ms),
        );
        Ok(())
    }

    async fn run_launch(self: Arc<Self>, slot: SessionSlot) {
        let (session_id, configuration) = {
            let entry = slot.lock().await;
            (entry.session.id, entry.session.configuration.clone())
        };
        let launcher = self.launcher.clone();
        let mut start = tokio::spawn(async move { launcher.start(&configuration).await });

        let result = match tokio::time::timeout(self.settings.start_timeout, &mut start).await {
            Ok(Ok(result)) => result.map_err(SessionError::from),
            Ok(Err(e)) => Err(SessionError::Launch(LaunchError::StartFailed(format!(
                "start task failed: {}",
                e
            )))),
            Err(_) => {
                self.reap_late_container(session_id, start);
                Err(SessionError::Timeout(format!(
                    "container start exceeded {:?}",
                    self.settings.start_timeout
                )))
            }
        };

        let mut entry = slot.lock().await;
        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                error!("[{}] Launch failed: {}", session_id, e);
                if let Err(e) = self.transition(&mut entry, SessionStatus::Error, Some(e.to_string())) {
                    debug!("[{}] {}", session_id, e);
                }
                return;
            }
        };

        if entry.session.status != SessionStatus::Starting {
            warn!("[{}] Container started for a settled session, removing it", session_id);
            drop(entry);
            if let Err(e) = self.launcher.stop(&handle).await {
                error!("[{}] Failed to remove orphan container: {}", session_id, e);
            }
            return;
        }

        info!("[{}] Container {} started", session_id, handle.name);
        entry.session.container = Some(handle);
        entry.last_heartbeat = Instant::now();
        if let Err(e) = self.transition(&mut entry, SessionStatus::Running, None) {
            error!("[{}] {}", session_id, e);
            return;
        }

        if entry.stop_requested {
            let detail = Some("stop requested during launch".to_string());
            if self.transition(&mut entry, SessionStatus::Stopping, detail).is_ok() {
                drop(entry);
                self.spawn_teardown(slot);
            }
        }
    }

    /// Removes the container of a start that outlived its timeout, if it ever comes up.
    fn reap_late_container(
        &self,
        session_id: Uuid,
        start: JoinHandle<Result<ContainerHandle, LaunchError>>,
    ) {
        let launcher = self.launcher.clone();
        tokio::spawn(async move {
            if let Ok(Ok(handle)) = start.await {
                warn!("[{}] Container {} came up after the start timeout, removing it", session_id, handle.name);
                if let Err(e) = launcher.stop(&handle).await {
                    error!("[{}] Failed to remove late container: {}", session_id, e);
                }
            }
        });
    }

    fn spawn_teardown(self: &Arc<Self>, slot: SessionSlot) {
        let shared = self.clone();
        tokio::spawn(async move { shared.teardown(slot).await });
    }

    async fn teardown(&self, slot: SessionSlot) {
        let (session_id, handle) = {
            let entry = slot.lock().await;
            (entry.session.id, entry.session.container.clone())
        };

        let outcome = match handle {
            Some(ref handle) => {
                tokio::time::timeout(
                    self.settings.stop_timeout,
                    self.stop_container(session_id, handle),
                )
                .await
            }
            None => Ok(Ok(())),
        };

        let mut entry = slot.lock().await;
        let result = match outcome {
            Ok(Ok(())) => self.transition(&mut entry, SessionStatus::Stopped, None),
            Ok(Err(e)) => {
                error!("[{}] Teardown failed: {}", session_id, e);
                self.transition(&mut entry, SessionStatus::Error, Some(e.to_string()))
            }
            Err(_) => {
                let detail = format!("teardown timed out after {:?}", self.settings.stop_timeout);
                warn!("[{}] {}", session_id, detail);
                self.transition(&mut entry, SessionStatus::Stopped, Some(detail))
            }
        };
        if let Err(e) = result {
            debug!("[{}] Teardown finished on a settled session: {}", session_id, e);
        }
    }

    async fn stop_container(
        &self,
        session_id: Uuid,
        handle: &ContainerHandle,
    ) -> Result<(), LaunchError> {
        let policy = self.settings.teardown;
        let mut attempt = 1;
        loop {
            match self.launcher.stop(handle).await {
                Ok(()) => return Ok(()),
                Err(e) if policy.should_retry(attempt) => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        "[{}] Teardown attempt {}/{} failed: {}; retrying in {:?}",
                        session_id, attempt, policy.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
