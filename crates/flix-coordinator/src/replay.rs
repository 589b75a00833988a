use flix_core::ItemClass;
use flix_storage::{PropertyStore, StorageError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const REPLAY_KEY_PREFIX: &str = "flix.replay.";

/// Last resolution for one class of item. Each class has a single slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub identity: String,
    pub path: String,
}

#[derive(Clone)]
pub struct ReplayCache {
    store: Arc<dyn PropertyStore>,
}

impl ReplayCache {
    pub fn new(store: Arc<dyn PropertyStore>) -> Self {
        Self { store }
    }

    fn key(class: ItemClass) -> String {
        format!("{REPLAY_KEY_PREFIX}{class}")
    }

    pub fn load(&self, class: ItemClass) -> Result<Option<ReplayRecord>, StorageError> {
        let Some(raw) = self.store.get(&Self::key(class))? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(event = "replay_record_corrupt", class = %class, error = %err);
                Ok(None)
            }
        }
    }

    /// Stored path when the slot for `class` belongs to `identity`.
    pub fn check(&self, class: ItemClass, identity: &str) -> Result<Option<String>, StorageError> {
        let hit = self
            .load(class)?
            .filter(|record| record.identity == identity)
            .map(|record| record.path);
        debug!(
            event = "replay_check",
            class = %class,
            identity,
            hit = hit.is_some()
        );
        Ok(hit)
    }

    pub fn record(&self, class: ItemClass, identity: &str, path: &str) -> Result<(), StorageError> {
        let record = ReplayRecord {
            identity: identity.to_string(),
            path: path.to_string(),
        };
        let raw = serde_json::to_string(&record)
            .map_err(|err| StorageError::Encode(err.to_string()))?;
        self.store.set(&Self::key(class), &raw)?;
        debug!(event = "replay_recorded", class = %class, identity);
        Ok(())
    }

    pub fn clear(&self, class: ItemClass) -> Result<(), StorageError> {
        self.store.remove(&Self::key(class))
    }
}
