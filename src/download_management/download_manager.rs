use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::configuration::DownloadConfig;
use crate::download_management::download::{partial_path, Download, DownloadStatus};
use crate::download_management::transfer::TransferSource;
use crate::error_handling::types::{DownloadError, TransferError};
use crate::events::{DownloadEvent, DownloadEventKind, EventSink};
use crate::retry::RetryPolicy;
use crate::storage::{self, EntityKind, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSettings {
    pub retry: RetryPolicy,
    pub progress_timeout: Duration,
    pub persist_interval: Duration,
}

impl From<&DownloadConfig> for DownloadSettings {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            retry: config.retry_policy(),
            progress_timeout: config.progress_timeout(),
            persist_interval: config.persist_interval(),
        }
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

/// Why a running transfer was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancel,
    Pause,
}

struct DownloadEntry {
    download: Download,
    cancel: CancellationToken,
    interrupt: Option<Interrupt>,
}

type DownloadSlot = Arc<Mutex<DownloadEntry>>;

/// Admission state. Its lock is the only gate for taking a worker slot.
struct Scheduler {
    queue: VecDeque<String>,
    running: usize,
    max_concurrent: usize,
    closed: bool,
}

struct Shared {
    downloads: RwLock<HashMap<String, DownloadSlot>>,
    scheduler: Mutex<Scheduler>,
    source: Arc<dyn TransferSource>,
    storage: Arc<dyn Storage>,
    events: Arc<EventSink>,
    settings: DownloadSettings,
}

/// A taken worker slot. Dropping it frees the slot and admits the next queued download.
struct SlotGuard {
    shared: Arc<Shared>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        {
            let mut scheduler = self.shared.lock_scheduler();
            scheduler.running = scheduler.running.saturating_sub(1);
        }
        self.shared.pump();
    }
}

/// Bounded pool of installer downloads, one per game.
///
/// Lock order is table → entry → scheduler; none of them is held across an await.
/// Terminal downloads stay visible until cleared or replaced by a new enqueue.
#[derive(Clone)]
pub struct DownloadManager {
    shared: Arc<Shared>,
}

impl DownloadManager {
    pub fn new(
        source: Arc<dyn TransferSource>,
        storage: Arc<dyn Storage>,
        events: Arc<EventSink>,
        max_concurrent: usize,
        settings: DownloadSettings,
    ) -> Self {
        info!("Download manager ready ({} concurrent)", max_concurrent.max(1));
        Self {
            shared: Arc::new(Shared {
                downloads: RwLock::new(HashMap::new()),
                scheduler: Mutex::new(Scheduler {
                    queue: VecDeque::new(),
                    running: 0,
                    max_concurrent: max_concurrent.max(1),
                    closed: false,
                }),
                source,
                storage,
                events,
                settings,
            }),
        }
    }

    /// Queues an installer download for `game_id`.
    ///
    /// Must be called from within a tokio runtime, which runs the transfer.
    pub fn enqueue(
        &self,
        game_id: &str,
        source_url: &str,
        target_path: impl Into<PathBuf>,
    ) -> Result<Download, DownloadError> {
        require_runtime("enqueue")?;
        let target_path = target_path.into();
        if source_url.trim().is_empty() {
            return Err(DownloadError::InvalidArgument("empty source url".to_string()));
        }
        if target_path.file_name().is_none() {
            return Err(DownloadError::InvalidArgument(format!(
                "target {} has no file name",
                target_path.display()
            )));
        }

        let download = Download::new(game_id, source_url, target_path);
        {
            let mut downloads = self.shared.write_table();
            if let Some(existing) = downloads.get(game_id) {
                let status = lock_entry(existing).download.status;
                if !status.is_terminal() {
                    warn!("[{}] Enqueue refused, download is {}", game_id, status);
                    return Err(DownloadError::Conflict(game_id.to_string()));
                }
            }
            downloads.insert(
                game_id.to_string(),
                Arc::new(Mutex::new(DownloadEntry {
                    download: download.clone(),
                    cancel: CancellationToken::new(),
                    interrupt: None,
                })),
            );
            self.shared
                .lock_scheduler()
                .queue
                .push_back(game_id.to_string());
        }

        info!("[{}] Queued {} -> {}", game_id, source_url, download.target_path.display());
        self.shared.persist(&download);
        self.shared
            .events
            .record_download(DownloadEvent::new(DownloadEventKind::Queued, game_id, 0));
        self.shared.pump();
        Ok(download)
    }

    /// Cancels a queued, running or paused download.
    ///
    /// Queued and paused downloads are cancelled on the spot. A running one is
    /// signalled and settles as `cancelled` once its worker has removed the partial file.
    pub fn cancel_download(&self, game_id: &str) -> Result<(), DownloadError> {
        let slot = self.shared.slot(game_id)?;
        let mut entry = lock_entry(&slot);
        match entry.download.status {
            DownloadStatus::Queued => {
                if self.shared.dequeue(game_id) {
                    self.shared.settle(&mut entry, DownloadStatus::Cancelled, None);
                } else {
                    // Admitted concurrently; the admission path sees the interrupt.
                    entry.interrupt = Some(Interrupt::Cancel);
                    entry.cancel.cancel();
                }
                Ok(())
            }
            DownloadStatus::Downloading => {
                info!("[{}] Cancelling transfer", game_id);
                entry.interrupt = Some(Interrupt::Cancel);
                entry.cancel.cancel();
                Ok(())
            }
            DownloadStatus::Paused => {
                let partial = entry.download.partial_path();
                if let Err(e) = std::fs::remove_file(&partial) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("[{}] Failed to remove {}: {}", game_id, partial.display(), e);
                    }
                }
                self.shared.settle(&mut entry, DownloadStatus::Cancelled, None);
                Ok(())
            }
            DownloadStatus::Cancelled => Ok(()),
            status => Err(DownloadError::InvalidState {
                operation: "cancel".to_string(),
                status: status.to_string(),
            }),
        }
    }

    /// Pauses a queued or running download, keeping its partial file.
    pub fn pause_download(&self, game_id: &str) -> Result<(), DownloadError> {
        let slot = self.shared.slot(game_id)?;
        let mut entry = lock_entry(&slot);
        match entry.download.status {
            DownloadStatus::Queued => {
                if self.shared.dequeue(game_id) {
                    self.shared.settle(&mut entry, DownloadStatus::Paused, None);
                } else {
                    entry.interrupt = Some(Interrupt::Pause);
                    entry.cancel.cancel();
                }
                Ok(())
            }
            DownloadStatus::Downloading => {
                info!("[{}] Pausing transfer", game_id);
                entry.interrupt = Some(Interrupt::Pause);
                entry.cancel.cancel();
                Ok(())
            }
            DownloadStatus::Paused => Ok(()),
            status => Err(DownloadError::InvalidState {
                operation: "pause".to_string(),
                status: status.to_string(),
            }),
        }
    }

    /// Puts a paused download back at the end of the queue. Needs a tokio runtime.
    pub fn resume_download(&self, game_id: &str) -> Result<(), DownloadError> {
        require_runtime("resume")?;
        let slot = self.shared.slot(game_id)?;
        {
            let mut entry = lock_entry(&slot);
            if entry.download.status != DownloadStatus::Paused {
                return Err(DownloadError::InvalidState {
                    operation: "resume".to_string(),
                    status: entry.download.status.to_string(),
                });
            }
            entry.cancel = CancellationToken::new();
            entry.interrupt = None;
            entry.download.error = None;
            self.shared.settle(&mut entry, DownloadStatus::Queued, None);
            self.shared
                .lock_scheduler()
                .queue
                .push_back(game_id.to_string());
        }
        self.shared.pump();
        Ok(())
    }

    pub fn get_download(&self, game_id: &str) -> Result<Download, DownloadError> {
        let slot = self.shared.slot(game_id)?;
        let entry = lock_entry(&slot);
        Ok(entry.download.clone())
    }

    /// Every tracked download, oldest first.
    pub fn get_all_downloads(&self) -> Vec<Download> {
        let slots: Vec<DownloadSlot> = self.shared.read_table().values().cloned().collect();
        let mut downloads: Vec<Download> = slots
            .iter()
            .map(|slot| lock_entry(slot).download.clone())
            .collect();
        downloads.sort_by_key(|d| d.created_at);
        downloads
    }

    /// Changes the worker ceiling. Running transfers are never pre-empted.
    pub fn set_max_concurrent_downloads(&self, max: usize) -> Result<(), DownloadError> {
        if max == 0 {
            return Err(DownloadError::InvalidArgument(
                "max concurrent downloads must be at least 1".to_string(),
            ));
        }
        {
            let mut scheduler = self.shared.lock_scheduler();
            info!(
                "Download ceiling {} -> {} ({} running)",
                scheduler.max_concurrent, max, scheduler.running
            );
            scheduler.max_concurrent = max;
        }
        self.shared.pump();
        Ok(())
    }

    pub fn max_concurrent_downloads(&self) -> usize {
        self.shared.lock_scheduler().max_concurrent
    }

    /// Number of worker slots currently taken.
    pub fn active_transfers(&self) -> usize {
        self.shared.lock_scheduler().running
    }

    /// Forgets a finished download.
    pub fn clear_download(&self, game_id: &str) -> Result<(), DownloadError> {
        let mut downloads = self.shared.write_table();
        let status = match downloads.get(game_id) {
            Some(slot) => lock_entry(slot).download.status,
            None => return Err(DownloadError::NotFound(game_id.to_string())),
        };
        if !status.is_terminal() {
            return Err(DownloadError::InvalidState {
                operation: "clear".to_string(),
                status: status.to_string(),
            });
        }
        downloads.remove(game_id);
        debug!("[{}] Cleared {} download", game_id, status);
        Ok(())
    }

    /// Forgets every finished download and returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut downloads = self.shared.write_table();
        let before = downloads.len();
        downloads.retain(|_, slot| !lock_entry(slot).download.status.is_terminal());
        before - downloads.len()
    }

    /// Takes back a paused download persisted by an earlier run so it can be resumed.
    pub fn restore_paused(&self, download: Download) -> Result<(), DownloadError> {
        if download.status != DownloadStatus::Paused {
            return Err(DownloadError::InvalidState {
                operation: "restore".to_string(),
                status: download.status.to_string(),
            });
        }
        let mut downloads = self.shared.write_table();
        if downloads.contains_key(&download.game_id) {
            return Err(DownloadError::Conflict(download.game_id));
        }
        info!(
            "[{}] Restored paused download ({} bytes on disk)",
            download.game_id, download.bytes_transferred
        );
        downloads.insert(
            download.game_id.clone(),
            Arc::new(Mutex::new(DownloadEntry {
                download,
                cancel: CancellationToken::new(),
                interrupt: None,
            })),
        );
        Ok(())
    }

    /// Stops admitting work and pauses running transfers, waiting for their workers to settle.
    pub async fn shutdown(&self, grace: Duration) {
        self.shared.lock_scheduler().closed = true;
        let slots: Vec<DownloadSlot> = self.shared.read_table().values().cloned().collect();
        for slot in slots {
            let mut entry = lock_entry(&slot);
            if entry.download.status == DownloadStatus::Downloading {
                entry.interrupt = Some(Interrupt::Pause);
                entry.cancel.cancel();
            }
        }

        let deadline = Instant::now() + grace;
        while self.active_transfers() > 0 {
            if Instant::now() >= deadline {
                warn!("{} transfer(s) still running at shutdown", self.active_transfers());
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        info!("Download manager stopped");
    }
}

fn require_runtime(operation: &str) -> Result<(), DownloadError> {
    match tokio::runtime::Handle::try_current() {
        Ok(_) => Ok(()),
        Err(_) => {
            error!("Cannot {} a download without a tokio runtime", operation);
            Err(DownloadError::RuntimeUnavailable(operation.to_string()))
        }
    }
}

fn lock_entry(slot: &DownloadSlot) -> MutexGuard<'_, DownloadEntry> {
    slot.lock().unwrap_or_else(|p| p.into_inner())
}

impl Shared {
    fn lock_scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, DownloadSlot>> {
        self.downloads.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_table(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, DownloadSlot>> {
        self.downloads.write().unwrap_or_else(|p| p.into_inner())
    }

    fn slot(&self, game_id: &str) -> Result<DownloadSlot, DownloadError> {
        self.read_table()
            .get(game_id)
            .cloned()
            .ok_or_else(|| DownloadError::NotFound(game_id.to_string()))
    }

    /// Removes `game_id` from the queue; false if a worker already took it.
    fn dequeue(&self, game_id: &str) -> bool {
        let mut scheduler = self.lock_scheduler();
        match scheduler.queue.iter().position(|id| id == game_id) {
            Some(index) => {
                scheduler.queue.remove(index);
                true
            }
            None => false,
        }
    }

    fn persist(&self, download: &Download) {
        if let Err(e) = storage::save_record(
            self.storage.as_ref(),
            EntityKind::Download,
            &download.game_id,
            download,
        ) {
            warn!("[{}] Failed to persist download: {}", download.game_id, e);
        }
    }

    /// Moves a download to `status`, then writes it through and records the event.
    fn settle(&self, entry: &mut DownloadEntry, status: DownloadStatus, detail: Option<String>) {
        let download = &mut entry.download;
        let previous = download.status;
        download.status = status;
        download.updated_at = Utc::now();
        if status == DownloadStatus::Error {
            download.error = detail.clone();
        }
        let kind = match status {
            DownloadStatus::Queued => DownloadEventKind::Queued,
            DownloadStatus::Downloading => DownloadEventKind::Started,
            DownloadStatus::Paused => DownloadEventKind::Paused,
            DownloadStatus::Completed => DownloadEventKind::Completed,
            DownloadStatus::Cancelled => DownloadEventKind::Cancelled,
            DownloadStatus::Error => DownloadEventKind::Failed,
        };
        info!("[{}] {} -> {}", download.game_id, previous, status);
        self.persist(download);
        self.events.record_download(
            DownloadEvent::new(kind, download.game_id.clone(), download.bytes_transferred)
                .with_detail(detail),
        );
    }

    fn update(&self, slot: &DownloadSlot, apply: impl FnOnce(&mut Download)) {
        let mut entry = lock_entry(slot);
        apply(&mut entry.download);
        entry.download.updated_at = Utc::now();
    }

    /// Admits queued downloads while slots are free.
    fn pump(self: &Arc<Self>) {
        if tokio::runtime::Handle::try_current().is_err() {
            debug!("No runtime available, not admitting downloads");
            return;
        }
        let admitted: Vec<String> = {
            let mut scheduler = self.lock_scheduler();
            let mut admitted = Vec::new();
            while !scheduler.closed && scheduler.running < scheduler.max_concurrent {
                match scheduler.queue.pop_front() {
                    Some(game_id) => {
                        scheduler.running += 1;
                        admitted.push(game_id);
                    }
                    None => break,
                }
            }
            admitted
        };
        for game_id in admitted {
            let guard = SlotGuard {
                shared: self.clone(),
            };
            self.start_worker(&game_id, guard);
        }
    }

    fn start_worker(self: &Arc<Self>, game_id: &str, guard: SlotGuard) {
        let Ok(slot) = self.slot(game_id) else {
            debug!("[{}] Admitted download vanished", game_id);
            return;
        };
        let cancel = {
            let mut entry = lock_entry(&slot);
            if entry.download.status != DownloadStatus::Queued {
                return;
            }
            match entry.interrupt.take() {
                Some(Interrupt::Cancel) => {
                    self.settle(&mut entry, DownloadStatus::Cancelled, None);
                    return;
                }
                Some(Interrupt::Pause) => {
                    self.settle(&mut entry, DownloadStatus::Paused, None);
                    return;
                }
                None => {}
            }
            entry.download.started_at = Some(Utc::now());
            entry.download.attempts = 0;
            self.settle(&mut entry, DownloadStatus::Downloading, None);
            entry.cancel.clone()
        };

        let shared = self.clone();
        tokio::spawn(async move { shared.run_worker(slot, cancel, guard).await });
    }

    async fn run_worker(self: Arc<Self>, slot: DownloadSlot, cancel: CancellationToken, _guard: SlotGuard) {
        let (game_id, url, target) = {
            let entry = lock_entry(&slot);
            (
                entry.download.game_id.clone(),
                entry.download.source_url.clone(),
                entry.download.target_path.clone(),
            )
        };
        let policy = self.settings.retry;
        let mut attempt = 0;

        let outcome = loop {
            attempt += 1;
            self.update(&slot, |d| d.attempts = attempt);
            match self.transfer(&slot, &url, &target, &cancel).await {
                Ok(bytes) => break Ok(bytes),
                Err(TransferError::Cancelled) => break Err(TransferError::Cancelled),
                Err(e) if e.is_retryable() && policy.should_retry(attempt) => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        "[{}] Attempt {}/{} failed: {}; retrying in {:?}",
                        game_id, attempt, policy.max_attempts, e, delay
                    );
                    let bytes = lock_entry(&slot).download.bytes_transferred;
                    self.events.record_download(
                        DownloadEvent::new(DownloadEventKind::Retrying, game_id.clone(), bytes)
                            .with_detail(Some(e.to_string())),
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break Err(TransferError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => break Err(e),
            }
        };

        self.finish(&slot, &game_id, &target, outcome).await;
    }

    async fn finish(
        &self,
        slot: &DownloadSlot,
        game_id: &str,
        target: &Path,
        outcome: Result<u64, TransferError>,
    ) {
        match outcome {
            Ok(bytes) => {
                info!("[{}] Completed ({} bytes)", game_id, bytes);
                let mut entry = lock_entry(slot);
                self.settle(&mut entry, DownloadStatus::Completed, None);
            }
            Err(TransferError::Cancelled) => {
                let interrupt = lock_entry(slot).interrupt;
                if interrupt != Some(Interrupt::Pause) {
                    let partial = partial_path(target);
                    if let Err(e) = fs::remove_file(&partial).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!("[{}] Failed to remove {}: {}", game_id, partial.display(), e);
                        }
                    }
                }
                let mut entry = lock_entry(slot);
                let status = match entry.interrupt.take() {
                    Some(Interrupt::Pause) => DownloadStatus::Paused,
                    _ => DownloadStatus::Cancelled,
                };
                self.settle(&mut entry, status, None);
            }
            Err(e) => {
                error!("[{}] Download failed: {}", game_id, e);
                let mut entry = lock_entry(slot);
                self.settle(&mut entry, DownloadStatus::Error, Some(e.to_string()));
            }
        }
    }

    /// One attempt: stream the payload into `<target>.part`, verify it, rename it into place.
    async fn transfer(
        &self,
        slot: &DownloadSlot,
        url: &str,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        let timeout = self.settings.progress_timeout;
        let partial = partial_path(target);
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let offset = match fs::metadata(&partial).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            opened = tokio::time::timeout(timeout, self.source.open(url, offset)) => opened,
        };
        let mut body = opened
            .map_err(|_| TransferError::Timeout(format!("no response within {:?}", timeout)))??;

        let offset = if body.resumed() { offset } else { 0 };
        let mut file = if offset > 0 {
            debug!("Resuming {} at byte {}", url, offset);
            OpenOptions::new().append(true).open(&partial).await?
        } else {
            fs::File::create(&partial).await?
        };
        let total = body.total_size();
        self.update(slot, |d| {
            d.total_size = total;
            d.bytes_transferred = offset;
        });

        let mut written = offset;
        let mut last_persist = Instant::now();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                next = tokio::time::timeout(timeout, body.next_chunk()) => next,
            };
            let chunk = match next {
                Err(_) => {
                    return Err(TransferError::Timeout(format!("no data for {:?}", timeout)))
                }
                Ok(chunk) => match chunk? {
                    Some(chunk) => chunk,
                    None => break,
                },
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            self.update(slot, |d| d.bytes_transferred = written);

            if last_persist.elapsed() >= self.settings.persist_interval {
                let snapshot = lock_entry(slot).download.clone();
                self.persist(&snapshot);
                last_persist = Instant::now();
            }
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = total {
            if written != expected {
                // The partial content cannot be trusted for a resume.
                let _ = fs::remove_file(&partial).await;
                self.update(slot, |d| d.bytes_transferred = 0);
                return Err(TransferError::SizeMismatch {
                    expected,
                    actual: written,
                });
            }
        }
        fs::rename(&partial, target).await?;
        Ok(written)
    }
}
