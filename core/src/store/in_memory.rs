use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use super::{KeyValueStore, StoreError};

/// In-memory implementation of KeyValueStore
#[derive(Debug, Default)]
pub struct InMemoryStore {
    /// Thread-safe storage of values
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryStore {
    /// Create a new InMemoryStore
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn save(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut values = self.values.write().map_err(|e| {
            StoreError::StorageError(format!("Failed to acquire write lock: {}", e))
        })?;

        values.insert(key.to_string(), value);
        debug!(key, "Stored value");
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.read().map_err(|e| {
            StoreError::StorageError(format!("Failed to acquire read lock: {}", e))
        })?;

        Ok(values.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self.values.write().map_err(|e| {
            StoreError::StorageError(format!("Failed to acquire write lock: {}", e))
        })?;

        if values.remove(key).is_some() {
            debug!(key, "Deleted value");
        }
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let values = self.values.read().map_err(|e| {
            StoreError::StorageError(format!("Failed to acquire read lock: {}", e))
        })?;

        let mut keys: Vec<String> = values
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
