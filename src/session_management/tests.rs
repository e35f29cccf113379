use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::container_management::{
    ContainerConfiguration, ContainerHandle, ContainerState, Launcher, RuntimeKind,
};
use crate::error_handling::types::{LaunchError, SessionError};
use crate::events::{Event, EventSink, SessionEventKind};
use crate::resolver::{
    AudioMethod, DisplayServer, HostEnvironment, InputSelection, LaunchRequest, ResourceResolver,
};
use crate::retry::RetryPolicy;
use crate::session_management::{
    ResourceSnapshot, RunnerSession, SessionManager, SessionSettings, SessionStatus,
};
use crate::storage::{self, EntityKind, GameRecord, MemoryStorage, Storage};

#[derive(Default)]
struct MockLauncher {
    start_delay: Duration,
    /// `start` never returns.
    hang_start: bool,
    stop_delay: Duration,
    fail_start: AtomicBool,
    failing_stops: AtomicU32,
    starts: AtomicU32,
    stops: AtomicU32,
    state: Mutex<Option<ContainerState>>,
}

impl MockLauncher {
    fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn start(&self, config: &ContainerConfiguration) -> Result<ContainerHandle, LaunchError> {
        if self.hang_start {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.start_delay).await;
        let n = self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(LaunchError::StartFailed(format!("{} refused to start", config.image)));
        }
        Ok(ContainerHandle {
            id: format!("c{}", n),
            name: format!("playhost-test-{}", n),
            runtime: RuntimeKind::Docker,
            created_at: Utc::now(),
        })
    }

    async fn stop(&self, _handle: &ContainerHandle) -> Result<(), LaunchError> {
        tokio::time::sleep(self.stop_delay).await;
        self.stops.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_stops.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_stops.store(failing - 1, Ordering::SeqCst);
            return Err(LaunchError::StopFailed("runtime busy".into()));
        }
        Ok(())
    }

    async fn inspect(&self, _handle: &ContainerHandle) -> Result<ContainerState, LaunchError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .unwrap_or(ContainerState::Running))
    }
}

fn fast_settings() -> SessionSettings {
    SessionSettings {
        heartbeat_timeout: Duration::from_secs(60),
        start_timeout: Duration::from_secs(5),
        stop_timeout: Duration::from_secs(2),
        retention: Duration::from_secs(3600),
        teardown: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
    }
}

struct Harness {
    manager: SessionManager,
    launcher: Arc<MockLauncher>,
    events: Arc<EventSink>,
    storage: Arc<MemoryStorage>,
}

fn harness(launcher: MockLauncher, settings: SessionSettings) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let launcher = Arc::new(launcher);
    let events = Arc::new(EventSink::new(256));
    let storage = Arc::new(MemoryStorage::new());
    let manager = SessionManager::new(
        launcher.clone(),
        ResourceResolver::new(HostEnvironment::default()),
        storage.clone(),
        events.clone(),
        settings,
    );
    Harness {
        manager,
        launcher,
        events,
        storage,
    }
}

fn headless_request() -> LaunchRequest {
    let mut request = LaunchRequest::new("runner:base");
    request.display = DisplayServer::Headless;
    request.audio = AudioMethod::None;
    request.input = InputSelection::None;
    request
}

async fn wait_for_status(
    manager: &SessionManager,
    id: Uuid,
    status: SessionStatus,
) -> RunnerSession {
    for _ in 0..200 {
        let session = manager.get_session(id).await.unwrap();
        if session.status == status {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let session = manager.get_session(id).await.unwrap();
    panic!("session stuck in {} waiting for {}", session.status, status);
}

fn session_kinds(events: &EventSink, id: Uuid) -> Vec<SessionEventKind> {
    events
        .events_since(0)
        .into_iter()
        .filter_map(|r| match r.event {
            Event::Session(e) if e.session_id == id => Some(e.kind),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn launch_then_stop_walks_the_whole_lifecycle() {
    let h = harness(MockLauncher::default(), fast_settings());

    let id = h.manager.launch("G1", headless_request()).await.unwrap();
    let running = wait_for_status(&h.manager, id, SessionStatus::Running).await;
    assert!(running.container.is_some());
    assert!(running.start_time.is_some());
    assert_eq!(
        running.configuration.labels.get("playhost.game").map(String::as_str),
        Some("G1")
    );

    h.manager.stop(id).await.unwrap();
    let stopped = wait_for_status(&h.manager, id, SessionStatus::Stopped).await;
    assert!(stopped.container.is_none());
    assert!(stopped.end_time.is_some());
    assert_eq!(h.launcher.stops(), 1);

    assert_eq!(
        session_kinds(&h.events, id),
        vec![
            SessionEventKind::Launched,
            SessionEventKind::Running,
            SessionEventKind::Stopping,
            SessionEventKind::Stopped,
        ]
    );

    let persisted: RunnerSession = storage::load_record(h.storage.as_ref(), EntityKind::Session, &id.to_string())
        .unwrap()
        .unwrap();
    assert_eq!(persisted.status, SessionStatus::Stopped);

    let game: GameRecord = storage::load_record(h.storage.as_ref(), EntityKind::Game, "G1")
        .unwrap()
        .unwrap();
    assert_eq!(game.play_stats.launch_count, 1);
    assert!(game.play_stats.last_played.is_some());
}

#[tokio::test]
async fn stop_is_idempotent() {
    let h = harness(MockLauncher::default(), fast_settings());
    let id = h.manager.launch("G1", headless_request()).await.unwrap();
    wait_for_status(&h.manager, id, SessionStatus::Running).await;

    h.manager.stop(id).await.unwrap();
    h.manager.stop(id).await.unwrap();
    wait_for_status(&h.manager, id, SessionStatus::Stopped).await;
    let events_before = h.events.latest_seq();

    h.manager.stop(id).await.unwrap();
    assert_eq!(h.launcher.stops(), 1);
    assert_eq!(h.events.latest_seq(), events_before);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let h = harness(MockLauncher::default(), fast_settings());
    let missing = Uuid::new_v4();
    assert!(matches!(h.manager.stop(missing).await, Err(SessionError::NotFound(_))));
    assert!(matches!(h.manager.get_session(missing).await, Err(SessionError::NotFound(_))));
    assert!(matches!(
        h.manager.heartbeat(missing, ResourceSnapshot::default()).await,
        Err(SessionError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_launches_admit_one_session_per_game() {
    let h = harness(
        MockLauncher {
            start_delay: Duration::from_millis(20),
            ..Default::default()
        },
        fast_settings(),
    );

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let manager = h.manager.clone();
        tasks.push(tokio::spawn(async move {
            manager.launch("G1", headless_request()).await
        }));
    }
    let mut admitted = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(SessionError::Conflict(game)) => {
                assert_eq!(game, "G1");
                conflicts += 1
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(h.manager.get_sessions("G1").await.len(), 1);
}

#[tokio::test]
async fn a_stopped_game_can_be_launched_again() {
    let h = harness(MockLauncher::default(), fast_settings());
    let first = h.manager.launch("G1", headless_request()).await.unwrap();
    wait_for_status(&h.manager, first, SessionStatus::Running).await;
    assert!(matches!(
        h.manager.launch("G1", headless_request()).await,
        Err(SessionError::Conflict(_))
    ));

    h.manager.stop(first).await.unwrap();
    wait_for_status(&h.manager, first, SessionStatus::Stopped).await;

    let second = h.manager.launch("G1", headless_request()).await.unwrap();
    assert_ne!(first, second);
    wait_for_status(&h.manager, second, SessionStatus::Running).await;
}

#[tokio::test]
async fn launcher_failure_ends_in_error_and_frees_the_game() {
    let launcher = MockLauncher::default();
    launcher.fail_start.store(true, Ordering::SeqCst);
    let h = harness(launcher, fast_settings());

    let id = h.manager.launch("G1", headless_request()).await.unwrap();
    let failed = wait_for_status(&h.manager, id, SessionStatus::Error).await;
    assert!(failed.error.unwrap().contains("refused to start"));
    assert!(failed.container.is_none());
    assert!(failed.end_time.is_some());
    assert_eq!(
        session_kinds(&h.events, id),
        vec![SessionEventKind::Launched, SessionEventKind::Failed]
    );

    h.launcher.fail_start.store(false, Ordering::SeqCst);
    let retry = h.manager.launch("G1", headless_request()).await.unwrap();
    wait_for_status(&h.manager, retry, SessionStatus::Running).await;
}

#[tokio::test]
async fn malformed_request_is_rejected_synchronously() {
    let h = harness(MockLauncher::default(), fast_settings());
    let mut request = headless_request();
    request.image = "Not An Image".into();

    assert!(matches!(
        h.manager.launch("G1", request).await,
        Err(SessionError::Configuration(_))
    ));
    assert!(h.manager.list_sessions().await.is_empty());
    assert_eq!(h.launcher.starts(), 0);
}

#[tokio::test]
async fn pause_and_resume_only_from_matching_states() {
    let h = harness(
        MockLauncher {
            start_delay: Duration::from_millis(50),
            ..Default::default()
        },
        fast_settings(),
    );
    let id = h.manager.launch("G1", headless_request()).await.unwrap();
    assert!(matches!(
        h.manager.pause(id).await,
        Err(SessionError::InvalidState { .. })
    ));

    wait_for_status(&h.manager, id, SessionStatus::Running).await;
    assert!(matches!(
        h.manager.resume(id).await,
        Err(SessionError::InvalidState { .. })
    ));

    h.manager.pause(id).await.unwrap();
    assert_eq!(h.manager.get_session(id).await.unwrap().status, SessionStatus::Paused);
    assert!(matches!(
        h.manager.pause(id).await,
        Err(SessionError::InvalidState { .. })
    ));

    h.manager.resume(id).await.unwrap();
    assert_eq!(h.manager.get_session(id).await.unwrap().status, SessionStatus::Running);
    assert_eq!(h.launcher.stops(), 0);

    let kinds = session_kinds(&h.events, id);
    assert!(kinds.ends_with(&[SessionEventKind::Paused, SessionEventKind::Resumed]));
}

#[tokio::test]
async fn paused_session_can_be_stopped() {
    let h = harness(MockLauncher::default(), fast_settings());
    let id = h.manager.launch("G1", headless_request()).await.unwrap();
    wait_for_status(&h.manager, id, SessionStatus::Running).await;
    h.manager.pause(id).await.unwrap();

    h.manager.stop(id).await.unwrap();
    wait_for_status(&h.manager, id, SessionStatus::Stopped).await;
}

#[tokio::test]
async fn heartbeat_records_latest_resources() {
    let h = harness(MockLauncher::default(), fast_settings());
    let id = h.manager.launch("G1", headless_request()).await.unwrap();
    wait_for_status(&h.manager, id, SessionStatus::Running).await;

    for cpu in [40.0, 12.5] {
        let snapshot = ResourceSnapshot {
            cpu_percent: cpu,
            memory_mb: 2048,
            gpu_percent: Some(70.0),
            fps: Some(60.0),
        };
        h.manager.heartbeat(id, snapshot).await.unwrap();
    }
    let session = h.manager.get_session(id).await.unwrap();
    assert_eq!(session.resources.unwrap().cpu_percent, 12.5);

    h.manager.stop(id).await.unwrap();
    wait_for_status(&h.manager, id, SessionStatus::Stopped).await;
    assert!(matches!(
        h.manager.heartbeat(id, ResourceSnapshot::default()).await,
        Err(SessionError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn silent_session_is_stopped_by_health_check() {
    let mut settings = fast_settings();
    settings.heartbeat_timeout = Duration::from_millis(50);
    let h = harness(MockLauncher::default(), settings);

    let id = h.manager.launch("G1", headless_request()).await.unwrap();
    wait_for_status(&h.manager, id, SessionStatus::Running).await;
    assert!(h.manager.check_health().await.is_empty());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(h.manager.check_health().await, vec![id]);
    wait_for_status(&h.manager, id, SessionStatus::Stopped).await;

    let stopping = h
        .events
        .events_since(0)
        .into_iter()
        .find_map(|r| match r.event {
            Event::Session(e) if e.kind == SessionEventKind::Stopping => Some(e),
            _ => None,
        })
        .unwrap();
    assert!(stopping.detail.unwrap().contains("no heartbeat"));
}

#[tokio::test]
async fn paused_sessions_are_not_considered_stalled() {
    let mut settings = fast_settings();
    settings.heartbeat_timeout = Duration::from_millis(30);
    let h = harness(MockLauncher::default(), settings);

    let id = h.manager.launch("G1", headless_request()).await.unwrap();
    wait_for_status(&h.manager, id, SessionStatus::Running).await;
    h.manager.pause(id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(h.manager.check_health().await.is_empty());
    h.manager.resume(id).await.unwrap();
    assert!(h.manager.check_health().await.is_empty());
}

#[tokio::test]
async fn exited_container_is_torn_down() {
    let h = harness(MockLauncher::default(), fast_settings());
    let id = h.manager.launch("G1", headless_request()).await.unwrap();
    wait_for_status(&h.manager, id, SessionStatus::Running).await;

    *h.launcher.state.lock().unwrap() = Some(ContainerState::Exited);
    assert_eq!(h.manager.check_health().await, vec![id]);
    wait_for_status(&h.manager, id, SessionStatus::Stopped).await;
    assert_eq!(h.launcher.stops(), 1);
}

#[tokio::test]
async fn stop_during_launch_is_applied_once_running() {
    let h = harness(
        MockLauncher {
            start_delay: Duration::from_millis(60),
            ..Default::default()
        },
        fast_settings(),
    );
    let id = h.manager.launch("G1", headless_request()).await.unwrap();
    h.manager.stop(id).await.unwrap();
    assert_eq!(h.manager.get_session(id).await.unwrap().status, SessionStatus::Starting);

    wait_for_status(&h.manager, id, SessionStatus::Stopped).await;
    assert_eq!(h.launcher.stops(), 1);
    assert_eq!(
        session_kinds(&h.events, id),
        vec![
            SessionEventKind::Launched,
            SessionEventKind::Running,
            SessionEventKind::Stopping,
            SessionEventKind::Stopped,
        ]
    );
}

#[tokio::test]
async fn teardown_is_retried_before_succeeding() {
    let launcher = MockLauncher::default();
    launcher.failing_stops.store(2, Ordering::SeqCst);
    let h = harness(launcher, fast_settings());

    let id = h.manager.launch("G1", headless_request()).await.unwrap();
    wait_for_status(&h.manager, id, SessionStatus::Running).await;
    h.manager.stop(id).await.unwrap();
    wait_for_status(&h.manager, id, SessionStatus::Stopped).await;
    assert_eq!(h.launcher.stops(), 3);
}

#[tokio::test]
async fn exhausted_teardown_ends_in_error() {
    let launcher = MockLauncher::default();
    launcher.failing_stops.store(10, Ordering::SeqCst);
    let h = harness(launcher, fast_settings());

    let id = h.manager.launch("G1", headless_request()).await.unwrap();
    wait_for_status(&h.manager, id, SessionStatus::Running).await;
    h.manager.stop(id).await.unwrap();
    let failed = wait_for_status(&h.manager, id, SessionStatus::Error).await;
    assert!(failed.error.unwrap().contains("runtime busy"));
    assert_eq!(h.launcher.stops(), 3);
}

#[tokio::test]
async fn teardown_timeout_still_ends_stopped() {
    let mut settings = fast_settings();
    settings.stop_timeout = Duration::from_millis(30);
    let h = harness(
        MockLauncher {
            stop_delay: Duration::from_millis(500),
            ..Default::default()
        },
        settings,
    );

    let id = h.manager.launch("G1", headless_request()).await.unwrap();
    wait_for_status(&h.manager, id, SessionStatus::Running).await;
    h.manager.stop(id).await.unwrap();
    wait_for_status(&h.manager, id, SessionStatus::Stopped).await;
}

#[tokio::test]
async fn stats_come_from_folded_events() {
    let h = harness(MockLauncher::default(), fast_settings());

    for _ in 0..2 {
        let id = h.manager.launch("G1", headless_request()).await.unwrap();
        wait_for_status(&h.manager, id, SessionStatus::Running).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.manager.stop(id).await.unwrap();
        wait_for_status(&h.manager, id, SessionStatus::Stopped).await;
    }
    h.launcher.fail_start.store(true, Ordering::SeqCst);
    let failed = h.manager.launch("G1", headless_request()).await.unwrap();
    wait_for_status(&h.manager, failed, SessionStatus::Error).await;

    let stats = h.manager.get_stats("G1").await;
    assert_eq!(stats.total_launches, 3);
    assert_eq!(stats.finished_sessions, 2);
    assert_eq!(stats.error_count, 1);
    assert!(stats.average_duration_secs.unwrap() >= 0.02);
    assert!(stats.total_play_secs >= 0.04);
    assert_eq!(stats.most_recent_status, Some(SessionStatus::Error));

    let empty = h.manager.get_stats("G404").await;
    assert_eq!(empty.total_launches, 0);
    assert_eq!(empty.average_duration_secs, None);
    assert_eq!(empty.most_recent_status, None);
}

#[tokio::test]
async fn expired_sessions_leave_the_live_table_but_stay_persisted() {
    let mut settings = fast_settings();
    settings.retention = Duration::ZERO;
    let h = harness(MockLauncher::default(), settings);

    let done = h.manager.launch("G1", headless_request()).await.unwrap();
    wait_for_status(&h.manager, done, SessionStatus::Running).await;
    h.manager.stop(done).await.unwrap();
    wait_for_status(&h.manager, done, SessionStatus::Stopped).await;
    let live = h.manager.launch("G2", headless_request()).await.unwrap();
    wait_for_status(&h.manager, live, SessionStatus::Running).await;

    assert_eq!(h.manager.cleanup_expired_sessions().await, 1);
    assert!(matches!(h.manager.get_session(done).await, Err(SessionError::NotFound(_))));
    assert!(h.manager.get_session(live).await.is_ok());
    assert!(h
        .storage
        .read_entity(EntityKind::Session, &done.to_string())
        .unwrap()
        .is_some());
    assert_eq!(h.manager.get_stats("G1").await.most_recent_status, Some(SessionStatus::Stopped));
}

#[tokio::test]
async fn shutdown_tears_down_every_live_session() {
    let h = harness(MockLauncher::default(), fast_settings());
    h.manager.spawn_monitor(Duration::from_millis(10));

    let a = h.manager.launch("G1", headless_request()).await.unwrap();
    let b = h.manager.launch("G2", headless_request()).await.unwrap();
    wait_for_status(&h.manager, a, SessionStatus::Running).await;
    wait_for_status(&h.manager, b, SessionStatus::Running).await;

    h.manager.shutdown().await.unwrap();
    for id in [a, b] {
        assert_eq!(h.manager.get_session(id).await.unwrap().status, SessionStatus::Stopped);
    }
    assert_eq!(h.launcher.stops(), 2);
}

#[tokio::test(start_paused = true)]
async fn start_that_never_returns_times_out_and_frees_the_game() {
    let launcher = MockLauncher {
        hang_start: true,
        ..Default::default()
    };
    let h = harness(launcher, fast_settings());

    let id = h.manager.launch("G1", headless_request()).await.unwrap();
    h.manager.stop(id).await.unwrap();
    assert_eq!(h.manager.get_session(id).await.unwrap().status, SessionStatus::Starting);

    tokio::time::sleep(Duration::from_secs(6)).await;
    let failed = h.manager.get_session(id).await.unwrap();
    assert_eq!(failed.status, SessionStatus::Error);
    assert!(failed.error.unwrap().contains("timed out"));
    assert!(failed.end_time.is_some());
    assert_eq!(
        session_kinds(&h.events, id),
        vec![SessionEventKind::Launched, SessionEventKind::Failed]
    );

    assert!(h.manager.launch("G1", headless_request()).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn container_arriving_after_the_start_timeout_is_removed() {
    let launcher = MockLauncher {
        start_delay: Duration::from_secs(8),
        ..Default::default()
    };
    let h = harness(launcher, fast_settings());

    let id = h.manager.launch("G1", headless_request()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.manager.get_session(id).await.unwrap().status, SessionStatus::Error);
    assert_eq!(h.launcher.stops(), 0);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.launcher.starts(), 1);
    assert_eq!(h.launcher.stops(), 1);
    let session = h.manager.get_session(id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Error);
    assert!(session.container.is_none());
}
