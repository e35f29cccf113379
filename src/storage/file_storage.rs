use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{EntityKind, StoredRecord};

/// JSON document store, one file per entity under `<base>/<collection>/<id>.json`.
///
/// Writes go to a temporary sibling and are renamed into place, so readers never
/// observe a half-written document.
pub struct FileStorage {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        for kind in [EntityKind::Session, EntityKind::Download, EntityKind::Game] {
            let dir = base_path.join(kind.collection());
            fs::create_dir_all(&dir).map_err(|e| {
                error!("Failed to create {} dir {}: {}", kind.as_str(), dir.display(), e);
                StorageError::WriteFailed(format!("{}: {}", dir.display(), e))
            })?;
        }
        info!("FileStorage initialized at {}", base_path.display());

        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn entity_path(&self, kind: EntityKind, id: &str) -> PathBuf {
        self.base_path
            .join(kind.collection())
            .join(format!("{}.json", file_stem(id)))
    }

    fn parse_record(path: &Path) -> Result<StoredRecord, StorageError> {
        let content = fs::read_to_string(path).map_err(|e| {
            error!("Failed to read record {}: {}", path.display(), e);
            StorageError::ReadFailed(format!("{}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            error!("Invalid record {}: {}", path.display(), e);
            StorageError::Serialization(format!("{}: {}", path.display(), e))
        })
    }
}

/// Maps an id onto a file name, one to one.
///
/// Ids made only of `[A-Za-z0-9_-]` are used as they are. Anything else is
/// written as `~` followed by the hex of its bytes; `~` never appears in a
/// plain stem, so the two forms cannot collide.
fn file_stem(id: &str) -> String {
    let plain = !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    match plain {
        true => id.to_string(),
        false => format!("~{}", hex::encode(id.as_bytes())),
    }
}

impl Storage for FileStorage {
    fn read_entity(&self, kind: EntityKind, id: &str) -> Result<Option<StoredRecord>, StorageError> {
        let path = self.entity_path(kind, id);
        if !path.exists() {
            return Ok(None);
        }
        let record = Self::parse_record(&path)?;
        if record.id != id {
            error!(
                "Record {} holds id {:?}, expected {:?}",
                path.display(),
                record.id,
                id
            );
            return Err(StorageError::ReadFailed(format!(
                "{}: holds {} {:?}, not {:?}",
                path.display(),
                kind.as_str(),
                record.id,
                id
            )));
        }
        debug!("Read {} {} (v{})", kind.as_str(), id, record.version);
        Ok(Some(record))
    }

    fn list_entities(&self, kind: EntityKind) -> Result<Vec<StoredRecord>, StorageError> {
        let dir = self.base_path.join(kind.collection());
        let entries = fs::read_dir(&dir).map_err(|e| {
            error!("Failed to read {} dir {}: {}", kind.as_str(), dir.display(), e);
            StorageError::ReadFailed(format!("{}: {}", dir.display(), e))
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| StorageError::ReadFailed(format!("dir entry: {}", e)))?
                .path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match Self::parse_record(&path) {
                Ok(record)
                    if path.file_stem().and_then(|s| s.to_str())
                        != Some(file_stem(&record.id).as_str()) =>
                {
                    warn!("Skipping misplaced record {} (id {:?})", path.display(), record.id);
                }
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }
        debug!("Loaded {} {} record(s)", records.len(), kind.as_str());
        Ok(records)
    }

    fn write_entity(
        &self,
        kind: EntityKind,
        id: &str,
        data: &serde_json::Value,
    ) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let path = self.entity_path(kind, id);

        let version = match path.exists() {
            true => Self::parse_record(&path).map(|r| r.version).unwrap_or(0) + 1,
            false => 1,
        };
        let record = StoredRecord {
            version,
            kind,
            id: id.to_string(),
            updated_at: Utc::now(),
            data: data.clone(),
        };
        let body = serde_json::to_vec_pretty(&record)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|e| {
            error!("Failed to write {}: {}", tmp.display(), e);
            StorageError::WriteFailed(format!("{}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &path).map_err(|e| {
            error!("Failed to move {} into place: {}", tmp.display(), e);
            StorageError::WriteFailed(format!("{}: {}", path.display(), e))
        })?;
        debug!("Saved {} {} (v{}) to {}", kind.as_str(), id, version, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn write_then_read_bumps_version() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        storage
            .write_entity(EntityKind::Game, "G1", &json!({"title": "First"}))
            .unwrap();
        storage
            .write_entity(EntityKind::Game, "G1", &json!({"title": "Second"}))
            .unwrap();

        let record = storage.read_entity(EntityKind::Game, "G1").unwrap().unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(record.kind, EntityKind::Game);
        assert_eq!(record.data["title"], "Second");
        assert!(dir.path().join("games/G1.json").exists());
    }

    #[test]
    fn unknown_id_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        assert!(storage
            .read_entity(EntityKind::Session, "missing")
            .unwrap()
            .is_none());
    }

    #[test]
    fn list_is_scoped_by_kind_and_skips_garbage() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage
            .write_entity(EntityKind::Download, "G2", &json!({"status": "queued"}))
            .unwrap();
        storage
            .write_entity(EntityKind::Download, "G3", &json!({"status": "queued"}))
            .unwrap();
        storage
            .write_entity(EntityKind::Game, "G2", &json!({}))
            .unwrap();
        fs::write(dir.path().join("downloads/broken.json"), b"{not json").unwrap();

        let downloads = storage.list_entities(EntityKind::Download).unwrap();
        assert_eq!(downloads.len(), 2);
        assert!(downloads.iter().all(|r| r.kind == EntityKind::Download));
    }

    #[test]
    fn ids_with_separators_stay_inside_the_collection() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage
            .write_entity(EntityKind::Game, "../escape/G1", &json!({}))
            .unwrap();

        let record = storage
            .read_entity(EntityKind::Game, "../escape/G1")
            .unwrap()
            .unwrap();
        assert_eq!(record.id, "../escape/G1");
        assert!(!dir.path().join("escape").exists());
    }

    #[test]
    fn ids_differing_only_in_punctuation_keep_separate_records() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage
            .write_entity(EntityKind::Download, "steam/123", &json!({"who": "slash"}))
            .unwrap();
        storage
            .write_entity(EntityKind::Download, "steam_123", &json!({"who": "underscore"}))
            .unwrap();
        storage
            .write_entity(EntityKind::Download, "steam.123", &json!({"who": "dot"}))
            .unwrap();

        let slash = storage
            .read_entity(EntityKind::Download, "steam/123")
            .unwrap()
            .unwrap();
        assert_eq!(slash.id, "steam/123");
        assert_eq!(slash.data["who"], "slash");
        assert_eq!(slash.version, 1);

        let underscore = storage
            .read_entity(EntityKind::Download, "steam_123")
            .unwrap()
            .unwrap();
        assert_eq!(underscore.data["who"], "underscore");
        assert_eq!(underscore.version, 1);
        assert!(dir.path().join("downloads/steam_123.json").exists());

        assert_eq!(storage.list_entities(EntityKind::Download).unwrap().len(), 3);
    }

    #[test]
    fn record_under_the_wrong_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage
            .write_entity(EntityKind::Game, "G1", &json!({}))
            .unwrap();
        fs::copy(
            dir.path().join("games/G1.json"),
            dir.path().join("games/G2.json"),
        )
        .unwrap();

        assert!(matches!(
            storage.read_entity(EntityKind::Game, "G2"),
            Err(StorageError::ReadFailed(_))
        ));
        let listed = storage.list_entities(EntityKind::Game).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "G1");
    }

    #[test]
    fn file_stems_are_distinct_and_filesystem_safe() {
        assert_eq!(file_stem("G1"), "G1");
        assert_eq!(file_stem("steam_123"), "steam_123");
        assert_eq!(file_stem("steam/123"), "~737465616d2f313233");
        assert_eq!(file_stem(".."), "~2e2e");
        assert_eq!(file_stem(""), "~");
        assert_ne!(file_stem("~41"), file_stem("A"));
    }
}
