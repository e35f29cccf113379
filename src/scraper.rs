//! Game metadata lookup.
//!
//! Scrapers are addressed by a fixed [`ScraperKind`] and held in a
//! [`ScraperRegistry`] built once at startup. The crate ships the library
//! scraper, which answers from the game records already in storage.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::error_handling::types::ScraperError;
use crate::storage::{self, EntityKind, GameRecord, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScraperKind {
    Library,
}

impl ScraperKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScraperKind::Library => "library",
        }
    }
}

impl FromStr for ScraperKind {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "library" => Ok(ScraperKind::Library),
            other => Err(ScraperError::UnknownScraper(other.to_string())),
        }
    }
}

/// Search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSummary {
    pub id: String,
    pub title: String,
    pub source: ScraperKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameDetail {
    pub id: String,
    pub title: String,
    pub source: ScraperKind,
    #[serde(default)]
    pub install_path: Option<String>,
    /// Source-specific payload, kept verbatim.
    #[serde(default)]
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait Scraper: Send + Sync {
    fn kind(&self) -> ScraperKind;

    async fn search(&self, query: &str) -> Result<Vec<GameSummary>, ScraperError>;

    async fn get_game_detail(&self, id: &str) -> Result<GameDetail, ScraperError>;
}

/// Answers from the locally stored game records.
pub struct LibraryScraper {
    storage: Arc<dyn Storage>,
}

impl LibraryScraper {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Scraper for LibraryScraper {
    fn kind(&self) -> ScraperKind {
        ScraperKind::Library
    }

    async fn search(&self, query: &str) -> Result<Vec<GameSummary>, ScraperError> {
        let needle = query.trim().to_lowercase();
        let records = self
            .storage
            .list_entities(EntityKind::Game)
            .map_err(|e| ScraperError::RequestFailed(e.to_string()))?;

        let mut hits: Vec<GameSummary> = records
            .into_iter()
            .filter_map(|record| serde_json::from_value::<GameRecord>(record.data).ok())
            .filter(|game| {
                needle.is_empty()
                    || game.title.to_lowercase().contains(&needle)
                    || game.id.to_lowercase().contains(&needle)
            })
            .map(|game| GameSummary {
                id: game.id,
                title: game.title,
                source: ScraperKind::Library,
            })
            .collect();
        hits.sort_by(|a, b| a.title.cmp(&b.title));
        debug!("Library search {:?}: {} hit(s)", query, hits.len());
        Ok(hits)
    }

    async fn get_game_detail(&self, id: &str) -> Result<GameDetail, ScraperError> {
        let game: GameRecord = storage::load_record(self.storage.as_ref(), EntityKind::Game, id)
            .map_err(|e| ScraperError::RequestFailed(e.to_string()))?
            .ok_or_else(|| ScraperError::NotFound(id.to_string()))?;
        let raw = serde_json::to_value(&game.play_stats).unwrap_or_default();
        Ok(GameDetail {
            id: game.id,
            title: game.title,
            source: ScraperKind::Library,
            install_path: game.install_path,
            raw,
        })
    }
}

/// Fixed set of scrapers, resolved by kind.
#[derive(Default, Clone)]
pub struct ScraperRegistry {
    scrapers: HashMap<ScraperKind, Arc<dyn Scraper>>,
}

impl ScraperRegistry {
    /// Registry holding the scrapers that need no credentials.
    pub fn with_defaults(storage: Arc<dyn Storage>) -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(LibraryScraper::new(storage)));
        registry
    }

    pub fn register(&mut self, scraper: Arc<dyn Scraper>) {
        self.scrapers.insert(scraper.kind(), scraper);
    }

    pub fn get(&self, kind: ScraperKind) -> Result<Arc<dyn Scraper>, ScraperError> {
        self.scrapers
            .get(&kind)
            .cloned()
            .ok_or_else(|| ScraperError::UnknownScraper(kind.as_str().to_string()))
    }

    pub fn kinds(&self) -> Vec<ScraperKind> {
        let mut kinds: Vec<_> = self.scrapers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}
