use chrono::Utc;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::configuration::config::Config;
use crate::container_management::{ContainerManager, Launcher};
use crate::download_management::{
    Download, DownloadManager, DownloadSettings, DownloadStatus, HttpSource, TransferSource,
};
use crate::error_handling::types::*;
use crate::events::EventSink;
use crate::resolver::{HostEnvironment, ResourceResolver};
use crate::scraper::ScraperRegistry;
use crate::session_management::{RunnerSession, SessionManager, SessionSettings, SessionStatus};
use crate::storage::{self, EntityKind, FileStorage, Storage};
use crate::web_interface::{ApiContext, WebServer};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Owns every service of the daemon and their background tasks.
pub struct Controller {
    config: Config,
    storage: Arc<dyn Storage>,
    launcher: Arc<dyn Launcher>,
    events: Arc<EventSink>,
    sessions: SessionManager,
    downloads: DownloadManager,
    scrapers: Arc<ScraperRegistry>,
    shutdown: CancellationToken,
    server: Option<JoinHandle<()>>,
}

impl Controller {
    /// Builds the services described by `config` against the real container runtime,
    /// HTTP and host environment.
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;
        let launcher = ContainerManager::new(config.runtime.kind, config.runtime.binary.clone())?;
        let source = HttpSource::new(CONNECT_TIMEOUT)
            .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?;
        Self::with_services(
            config,
            Arc::new(launcher),
            Arc::new(source),
            HostEnvironment::detect(),
        )
    }

    /// Builds the services around the given adapters.
    pub fn with_services(
        config: Config,
        launcher: Arc<dyn Launcher>,
        source: Arc<dyn TransferSource>,
        host: HostEnvironment,
    ) -> Result<Self, ControllerError> {
        debug!("Host environment: {:?}", host);
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(&config.storage.path)?);
        let events = Arc::new(EventSink::new(config.events.capacity));

        let sessions = SessionManager::new(
            launcher.clone(),
            ResourceResolver::new(host),
            storage.clone(),
            events.clone(),
            SessionSettings::from(&config.sessions),
        );
        let downloads = DownloadManager::new(
            source,
            storage.clone(),
            events.clone(),
            config.downloads.max_concurrent,
            DownloadSettings::from(&config.downloads),
        );
        let scrapers = Arc::new(ScraperRegistry::with_defaults(storage.clone()));
        info!(
            "Controller ready (storage {}, runtime {:?})",
            config.storage.path.display(),
            config.runtime.kind
        );

        Ok(Self {
            config,
            storage,
            launcher,
            events,
            sessions,
            downloads,
            scrapers,
            shutdown: CancellationToken::new(),
            server: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    pub fn events(&self) -> &Arc<EventSink> {
        &self.events
    }

    pub fn scrapers(&self) -> &Arc<ScraperRegistry> {
        &self.scrapers
    }

    /// Settles leftovers of a previous run, then starts the session monitor and the REST API.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        let orphaned = self.reconcile_orphaned_sessions().await?;
        if orphaned > 0 {
            warn!("Closed {} session(s) left open by a previous run", orphaned);
        }
        let interrupted = self.reconcile_orphaned_downloads()?;
        if interrupted > 0 {
            warn!("Closed {} download(s) left in flight by a previous run", interrupted);
        }

        self.sessions
            .spawn_monitor(self.config.sessions.health_check_interval());

        if self.config.server.enabled {
            let addr: SocketAddr = self.config.server.bind_address.parse().map_err(|_| {
                ControllerError::InitializationFailed(format!(
                    "invalid bind address {}",
                    self.config.server.bind_address
                ))
            })?;
            let server = WebServer::new(ApiContext {
                sessions: self.sessions.clone(),
                downloads: self.downloads.clone(),
                events: self.events.clone(),
                scrapers: self.scrapers.clone(),
            });
            let token = self.shutdown.clone();
            self.server = Some(tokio::spawn(async move { server.run(addr, token).await }));
        } else {
            info!("REST API disabled");
        }
        Ok(())
    }

    /// Stops the API, pauses transfers and tears down every live session.
    pub async fn shutdown(&mut self) -> Result<(), ControllerError> {
        info!("Shutting down");
        self.shutdown.cancel();
        if let Some(server) = self.server.take() {
            if let Err(e) = server.await {
                error!("REST API task failed: {:?}", e);
            }
        }
        self.downloads
            .shutdown(self.config.sessions.stop_timeout())
            .await;
        self.sessions.shutdown().await?;
        info!("Shutdown complete");
        Ok(())
    }

    /// Marks persisted sessions that never reached a terminal state as failed,
    /// removing any container they left behind.
    async fn reconcile_orphaned_sessions(&self) -> Result<usize, ControllerError> {
        let mut closed = 0;
        for record in self.storage.list_entities(EntityKind::Session)? {
            let mut session: RunnerSession = match serde_json::from_value(record.data) {
                Ok(session) => session,
                Err(e) => {
                    warn!("Skipping unreadable session record {}: {}", record.id, e);
                    continue;
                }
            };
            if session.status.is_terminal() {
                continue;
            }
            if let Some(handle) = session.container.take() {
                if let Err(e) = self.launcher.stop(&handle).await {
                    warn!("[{}] Leftover container {} not removed: {}", session.id, handle.name, e);
                }
            }
            let now = Utc::now();
            session.status = SessionStatus::Error;
            session.error = Some("interrupted by host restart".to_string());
            session.end_time = Some(now);
            session.last_activity = now;
            storage::save_record(
                self.storage.as_ref(),
                EntityKind::Session,
                &session.id.to_string(),
                &session,
            )?;
            closed += 1;
        }
        Ok(closed)
    }

    /// Closes persisted downloads that were queued or transferring when the previous
    /// process died, removing their partial files. Paused downloads are handed back
    /// to the download manager.
    fn reconcile_orphaned_downloads(&self) -> Result<usize, ControllerError> {
        let mut closed = 0;
        for record in self.storage.list_entities(EntityKind::Download)? {
            let mut download: Download = match serde_json::from_value(record.data) {
                Ok(download) => download,
                Err(e) => {
                    warn!("Skipping unreadable download record {}: {}", record.id, e);
                    continue;
                }
            };
            match download.status {
                DownloadStatus::Queued | DownloadStatus::Downloading => {}
                DownloadStatus::Paused => {
                    if let Err(e) = self.downloads.restore_paused(download) {
                        warn!("Paused download {} not restored: {}", record.id, e);
                    }
                    continue;
                }
                _ => continue,
            }

            let partial = download.partial_path();
            match std::fs::remove_file(&partial) {
                Ok(()) => debug!("[{}] Removed {}", download.game_id, partial.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("[{}] Failed to remove {}: {}", download.game_id, partial.display(), e),
            }
            download.status = DownloadStatus::Error;
            download.error = Some("interrupted by host restart".to_string());
            download.bytes_transferred = 0;
            download.updated_at = Utc::now();
            storage::save_record(
                self.storage.as_ref(),
                EntityKind::Download,
                &download.game_id,
                &download,
            )?;
            closed += 1;
        }
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container_management::{
        ContainerConfiguration, ContainerHandle, ContainerState, RuntimeKind,
    };
    use crate::download_management::TransferBody;
    use crate::resolver::{AudioMethod, DisplayServer, InputSelection, LaunchRequest, SessionMetadata};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingLauncher {
        stops: AtomicU32,
    }

    #[async_trait]
    impl Launcher for CountingLauncher {
        async fn start(
            &self,
            _config: &ContainerConfiguration,
        ) -> Result<ContainerHandle, LaunchError> {
            Ok(handle("c1"))
        }

        async fn stop(&self, _handle: &ContainerHandle) -> Result<(), LaunchError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn inspect(&self, _handle: &ContainerHandle) -> Result<ContainerState, LaunchError> {
            Ok(ContainerState::Running)
        }
    }

    struct NoSource;

    #[async_trait]
    impl TransferSource for NoSource {
        async fn open(
            &self,
            url: &str,
            _offset: u64,
        ) -> Result<Box<dyn TransferBody>, TransferError> {
            Err(TransferError::NotFound(url.to_string()))
        }
    }

    fn handle(id: &str) -> ContainerHandle {
        ContainerHandle {
            id: id.to_string(),
            name: format!("playhost-{}", id),
            runtime: RuntimeKind::Docker,
            created_at: Utc::now(),
        }
    }

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.server.enabled = false;
        config.storage.path = dir.path().to_path_buf();
        config.sessions.stop_timeout_secs = 2;
        config.sessions.teardown_backoff_ms = 10;
        config
    }

    fn controller(dir: &TempDir, launcher: Arc<CountingLauncher>) -> Controller {
        Controller::with_services(
            config(dir),
            launcher,
            Arc::new(NoSource),
            HostEnvironment::default(),
        )
        .unwrap()
    }

    fn headless(image: &str) -> LaunchRequest {
        let mut request = LaunchRequest::new(image);
        request.display = DisplayServer::Headless;
        request.audio = AudioMethod::None;
        request.input = InputSelection::None;
        request
    }

    #[tokio::test]
    async fn run_and_shutdown_stop_live_sessions() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(CountingLauncher::default());
        let mut controller = controller(&dir, launcher.clone());
        controller.run().await.unwrap();

        let id = controller
            .sessions()
            .launch("G1", headless("runner:base"))
            .await
            .unwrap();
        for _ in 0..100 {
            if controller.sessions().get_session(id).await.unwrap().status
                == SessionStatus::Running
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        controller.shutdown().await.unwrap();
        let session = controller.sessions().get_session(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Stopped);
        assert_eq!(launcher.stops.load(Ordering::SeqCst), 1);
        assert!(dir.path().join("sessions").is_dir());
    }

    #[tokio::test]
    async fn run_closes_sessions_left_open_by_a_previous_run() {
        let dir = TempDir::new().unwrap();
        {
            let storage = FileStorage::new(dir.path()).unwrap();
            let mut stale = RunnerSession::new(
                "G1",
                ContainerConfiguration::new("runner:base"),
                SessionMetadata::default(),
            );
            stale.status = SessionStatus::Running;
            stale.container = Some(handle("old"));
            storage::save_record(&storage, EntityKind::Session, &stale.id.to_string(), &stale)
                .unwrap();

            let mut finished = stale.clone();
            finished.id = uuid::Uuid::new_v4();
            finished.status = SessionStatus::Stopped;
            finished.container = None;
            storage::save_record(
                &storage,
                EntityKind::Session,
                &finished.id.to_string(),
                &finished,
            )
            .unwrap();
        }

        let launcher = Arc::new(CountingLauncher::default());
        let mut controller = controller(&dir, launcher.clone());
        controller.run().await.unwrap();
        assert_eq!(launcher.stops.load(Ordering::SeqCst), 1);

        let records = controller.storage.list_entities(EntityKind::Session).unwrap();
        let sessions: Vec<RunnerSession> = records
            .into_iter()
            .map(|r| serde_json::from_value(r.data).unwrap())
            .collect();
        assert_eq!(sessions.len(), 2);
        let closed = sessions
            .iter()
            .find(|s| s.status == SessionStatus::Error)
            .unwrap();
        assert_eq!(closed.error.as_deref(), Some("interrupted by host restart"));
        assert!(closed.container.is_none());
        controller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn run_closes_downloads_left_in_flight_by_a_previous_run() {
        let dir = TempDir::new().unwrap();
        let installers = dir.path().join("installers");
        std::fs::create_dir_all(&installers).unwrap();
        {
            let storage = FileStorage::new(dir.path()).unwrap();
            let entries = [
                ("G1", DownloadStatus::Downloading),
                ("G2", DownloadStatus::Queued),
                ("G3", DownloadStatus::Paused),
                ("G4", DownloadStatus::Completed),
            ];
            for (game, status) in entries {
                let mut download = Download::new(
                    game,
                    format!("http://x/{}", game),
                    installers.join(format!("{}.bin", game)),
                );
                download.status = status;
                download.bytes_transferred = 4;
                std::fs::write(download.partial_path(), b"part").unwrap();
                storage::save_record(&storage, EntityKind::Download, game, &download).unwrap();
            }
        }

        let mut controller = controller(&dir, Arc::new(CountingLauncher::default()));
        controller.run().await.unwrap();

        for game in ["G1", "G2"] {
            let download: Download =
                storage::load_record(controller.storage.as_ref(), EntityKind::Download, game)
                    .unwrap()
                    .unwrap();
            assert_eq!(download.status, DownloadStatus::Error);
            assert_eq!(download.error.as_deref(), Some("interrupted by host restart"));
            assert_eq!(download.bytes_transferred, 0);
            assert!(!download.partial_path().exists());
        }
        assert!(installers.join("G3.bin.part").exists());
        assert_eq!(
            controller.downloads().get_download("G3").unwrap().status,
            DownloadStatus::Paused
        );
        let completed: Download =
            storage::load_record(controller.storage.as_ref(), EntityKind::Download, "G4")
                .unwrap()
                .unwrap();
        assert_eq!(completed.status, DownloadStatus::Completed);
        controller.shutdown().await.unwrap();
    }

    #[test]
    fn missing_runtime_binary_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.runtime.binary = Some("/nonexistent/playhost-runtime".to_string());
        match Controller::new(config) {
            Err(ControllerError::LaunchError(LaunchError::RuntimeNotAvailable(_))) => {}
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("controller built without a runtime"),
        }
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.downloads.max_concurrent = 0;
        assert!(matches!(
            Controller::new(config),
            Err(ControllerError::ConfigurationError(ConfigError::NotInRange(_)))
        ));
    }
}
