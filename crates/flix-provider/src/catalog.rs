use crate::provider::{EpisodeQuery, MovieQuery, Provider};
use crate::ProviderError;
use flix_core::ProviderResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const CATALOG_ENV: &str = "FLIX_DEMO_CATALOG";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog parse failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    /// Free-text entries, matched case-insensitively as substrings.
    pub search: Vec<SearchEntry>,
    pub movies: Vec<MovieEntry>,
    pub episodes: Vec<EpisodeEntry>,
    /// `provider_data` token (string form) to playable path.
    pub resolve: BTreeMap<String, String>,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub query: String,
    #[serde(default)]
    pub results: Vec<ProviderResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieEntry {
    pub tmdb_id: i64,
    #[serde(default)]
    pub results: Vec<ProviderResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeEntry {
    pub tmdb_id: i64,
    pub season_number: u32,
    pub episode_number: u32,
    #[serde(default)]
    pub results: Vec<ProviderResult>,
}

impl Catalog {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CatalogProvider {
    catalog: Catalog,
}

impl CatalogProvider {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    /// Loads the catalog named by `FLIX_DEMO_CATALOG`; empty when unset.
    pub fn from_env() -> Result<Self, CatalogError> {
        match std::env::var(CATALOG_ENV) {
            Ok(path) if !path.trim().is_empty() => Ok(Self::new(Catalog::from_path(path)?)),
            _ => Ok(Self::default()),
        }
    }

    fn pause(&self) {
        if self.catalog.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.catalog.delay_ms));
        }
    }
}

fn token_key(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl Provider for CatalogProvider {
    fn search(&self, query: &str) -> Result<Vec<ProviderResult>, ProviderError> {
        self.pause();
        let needle = query.to_lowercase();
        Ok(self
            .catalog
            .search
            .iter()
            .filter(|entry| {
                let key = entry.query.to_lowercase();
                needle.contains(&key) || key.contains(&needle)
            })
            .flat_map(|entry| entry.results.iter().cloned())
            .collect())
    }

    fn search_movie(&self, query: &MovieQuery) -> Result<Vec<ProviderResult>, ProviderError> {
        self.pause();
        Ok(self
            .catalog
            .movies
            .iter()
            .filter(|entry| entry.tmdb_id == query.tmdb_id)
            .flat_map(|entry| entry.results.iter().cloned())
            .collect())
    }

    fn search_episode(&self, query: &EpisodeQuery) -> Result<Vec<ProviderResult>, ProviderError> {
        self.pause();
        Ok(self
            .catalog
            .episodes
            .iter()
            .filter(|entry| {
                entry.tmdb_id == query.tmdb_id
                    && entry.season_number == query.season_number
                    && entry.episode_number == query.episode_number
            })
            .flat_map(|entry| entry.results.iter().cloned())
            .collect())
    }

    fn resolve(&self, provider_data: &Value) -> Result<String, ProviderError> {
        self.pause();
        let key = token_key(provider_data);
        self.catalog
            .resolve
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::Failed(format!("unknown token {key}")))
    }
}
