use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

use super::types::{DownloadEvent, Event, EventRecord, GameStats, SessionEvent};

/// Bounded, append-only event log shared by the session and download managers.
///
/// - Old records are evicted once `capacity` is reached; per-game aggregates are
///   folded on append and are never evicted.
/// - Sequence numbers start at 1 and never repeat, so `events_since(0)` returns
///   everything still retained.
/// - Live subscribers receive every record through a broadcast channel; a slow
///   subscriber lags instead of blocking producers.
pub struct EventSink {
    state: Mutex<SinkState>,
    sender: broadcast::Sender<EventRecord>,
}

struct SinkState {
    records: VecDeque<EventRecord>,
    capacity: usize,
    next_seq: u64,
    stats: HashMap<String, GameStats>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity.min(4096));
        Self {
            state: Mutex::new(SinkState {
                records: VecDeque::with_capacity(capacity),
                capacity,
                next_seq: 1,
                stats: HashMap::new(),
            }),
            sender,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Event log lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn record_session(&self, event: SessionEvent) -> u64 {
        self.append(Event::Session(event))
    }

    pub fn record_download(&self, event: DownloadEvent) -> u64 {
        self.append(Event::Download(event))
    }

    fn append(&self, event: Event) -> u64 {
        let record = {
            let mut state = self.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state
                .stats
                .entry(event.game_id().to_string())
                .or_default()
                .fold(&event);
            if state.records.len() == state.capacity {
                state.records.pop_front();
            }
            let record = EventRecord { seq, event };
            state.records.push_back(record.clone());
            record
        };
        debug!("Event #{} recorded: {:?}", record.seq, record.event);
        // No receivers is fine.
        let _ = self.sender.send(record.clone());
        record.seq
    }

    /// Retained records with a sequence number greater than `seq`, oldest first.
    pub fn events_since(&self, seq: u64) -> Vec<EventRecord> {
        self.lock()
            .records
            .iter()
            .filter(|r| r.seq > seq)
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    pub fn latest_seq(&self) -> u64 {
        self.lock().next_seq - 1
    }

    pub fn game_stats(&self, game_id: &str) -> GameStats {
        self.lock().stats.get(game_id).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::{DownloadEventKind, SessionEventKind};
    use uuid::Uuid;

    fn session(kind: SessionEventKind, id: Uuid, game: &str) -> SessionEvent {
        SessionEvent::new(kind, id, game)
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let sink = EventSink::new(16);
        let id = Uuid::new_v4();
        let a = sink.record_session(session(SessionEventKind::Launched, id, "G1"));
        let b = sink.record_session(session(SessionEventKind::Running, id, "G1"));
        assert_eq!((a, b), (1, 2));
        assert_eq!(sink.latest_seq(), 2);

        let since = sink.events_since(1);
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].seq, 2);
    }

    #[test]
    fn eviction_keeps_aggregates() {
        let sink = EventSink::new(2);
        for _ in 0..5 {
            let id = Uuid::new_v4();
            sink.record_session(session(SessionEventKind::Launched, id, "G1"));
            sink.record_session(
                session(SessionEventKind::Stopped, id, "G1").with_duration_ms(Some(1_000)),
            );
        }
        sink.record_session(session(SessionEventKind::Failed, Uuid::new_v4(), "G1"));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.events_since(0).first().map(|r| r.seq), Some(10));

        let stats = sink.game_stats("G1");
        assert_eq!(stats.launches, 5);
        assert_eq!(stats.finished_sessions, 5);
        assert_eq!(stats.average_duration_ms(), Some(1_000));
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.last_session_event, Some(SessionEventKind::Failed));
        assert_eq!(sink.game_stats("unknown"), GameStats::default());
    }

    #[test]
    fn download_events_fold_per_game() {
        let sink = EventSink::new(8);
        sink.record_download(DownloadEvent::new(DownloadEventKind::Queued, "G2", 0));
        sink.record_download(DownloadEvent::new(DownloadEventKind::Completed, "G2", 4096));
        sink.record_download(DownloadEvent::new(DownloadEventKind::Failed, "G3", 10));

        assert_eq!(sink.game_stats("G2").bytes_downloaded, 4096);
        assert_eq!(sink.game_stats("G2").downloads_completed, 1);
        assert_eq!(sink.game_stats("G3").downloads_failed, 1);
    }

    #[tokio::test]
    async fn subscribers_receive_new_records() {
        let sink = EventSink::new(8);
        let mut rx = sink.subscribe();
        sink.record_download(DownloadEvent::new(DownloadEventKind::Started, "G2", 0));

        let record = rx.recv().await.unwrap();
        assert_eq!(record.seq, 1);
        assert!(matches!(record.event, Event::Download(ref e) if e.kind == DownloadEventKind::Started));
    }
}
