//! Observability sink for session and download lifecycle events.
//!
//! Both managers append to one [`EventSink`]; clients poll it with a sequence
//! number or subscribe to its broadcast stream. Session statistics are served
//! from the per-game aggregates it folds on append.

pub mod event_sink;
pub mod types;

pub use event_sink::EventSink;
pub use types::{
    DownloadEvent, DownloadEventKind, Event, EventRecord, GameStats, SessionEvent,
    SessionEventKind,
};
