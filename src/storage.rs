//! Storage subsystem
//!
//! This module provides the document store the managers write their state
//! through to, plus typed helpers on top of it.
//!
//! Components:
//! - `storage_trait`: the Storage trait defining a uniform API.
//! - `types`: the record envelope, entity kinds and game library records.
//! - `file_storage`: JSON files on disk, one per entity.
//! - `memory_storage`: in-process map, for tests and ephemeral runs.

pub mod file_storage;
pub mod memory_storage;
pub mod storage_trait;
pub mod types;

pub use file_storage::FileStorage;
pub use memory_storage::MemoryStorage;
pub use storage_trait::Storage;
pub use types::{EntityKind, GameRecord, PlayStats, StoredRecord};

use chrono::{DateTime, Utc};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error_handling::types::StorageError;

/// Serializes `value` and writes it under `kind`/`id`.
pub fn save_record<T: Serialize>(
    storage: &dyn Storage,
    kind: EntityKind,
    id: &str,
    value: &T,
) -> Result<(), StorageError> {
    let data = serde_json::to_value(value)?;
    storage.write_entity(kind, id, &data)
}

/// Reads and deserializes the document under `kind`/`id`.
pub fn load_record<T: DeserializeOwned>(
    storage: &dyn Storage,
    kind: EntityKind,
    id: &str,
) -> Result<Option<T>, StorageError> {
    match storage.read_entity(kind, id)? {
        Some(record) => Ok(Some(serde_json::from_value(record.data)?)),
        None => Ok(None),
    }
}

/// Adds one finished play session to the game's library record, creating it if needed.
pub fn record_play(
    storage: &dyn Storage,
    game_id: &str,
    started: DateTime<Utc>,
    ended: DateTime<Utc>,
) -> Result<GameRecord, StorageError> {
    let mut game = load_record::<GameRecord>(storage, EntityKind::Game, game_id)?
        .unwrap_or_else(|| GameRecord::new(game_id));
    let played = (ended - started).num_seconds().max(0) as u64;

    game.play_stats.launch_count += 1;
    game.play_stats.total_play_secs += played;
    game.play_stats.last_played = Some(ended);
    save_record(storage, EntityKind::Game, game_id, &game)?;

    debug!(
        "Game {} played {}s (total {}s over {} launches)",
        game_id, played, game.play_stats.total_play_secs, game.play_stats.launch_count
    );
    Ok(game)
}
