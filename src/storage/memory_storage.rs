use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{EntityKind, StoredRecord};

/// Volatile document store, used in tests and when persistence is not wanted.
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<(EntityKind, String), StoredRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn read_entity(&self, kind: EntityKind, id: &str) -> Result<Option<StoredRecord>, StorageError> {
        let records = self
            .records
            .lock()
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        Ok(records.get(&(kind, id.to_string())).cloned())
    }

    fn list_entities(&self, kind: EntityKind) -> Result<Vec<StoredRecord>, StorageError> {
        let records = self
            .records
            .lock()
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        Ok(records
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect())
    }

    fn write_entity(
        &self,
        kind: EntityKind,
        id: &str,
        data: &serde_json::Value,
    ) -> Result<(), StorageError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        let key = (kind, id.to_string());
        let version = records.get(&key).map(|r| r.version + 1).unwrap_or(1);
        records.insert(
            key,
            StoredRecord {
                version,
                kind,
                id: id.to_string(),
                updated_at: Utc::now(),
                data: data.clone(),
            },
        );
        Ok(())
    }
}
