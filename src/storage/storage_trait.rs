//! Storage Trait
//!
//! This module defines the `Storage` trait, a document store addressed by
//! entity kind and id.
//!
//! Implementors of this trait are responsible for:
//! - Wrapping each document in a versioned [`StoredRecord`]
//! - Returning `None` for unknown ids rather than an error
//! - Last-writer-wins semantics for concurrent writes of the same id
//!
//! All methods return a `Result` to handle potential storage errors.

use crate::error_handling::types::StorageError;
use crate::storage::types::{EntityKind, StoredRecord};

pub trait Storage: Send + Sync {
    /// Reads the record stored under `kind`/`id`, if any.
    fn read_entity(&self, kind: EntityKind, id: &str) -> Result<Option<StoredRecord>, StorageError>;

    /// Lists every record of `kind`. Order is unspecified.
    fn list_entities(&self, kind: EntityKind) -> Result<Vec<StoredRecord>, StorageError>;

    /// Writes `data` under `kind`/`id`, replacing any previous document.
    fn write_entity(
        &self,
        kind: EntityKind,
        id: &str,
        data: &serde_json::Value,
    ) -> Result<(), StorageError>;
}
