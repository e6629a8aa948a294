//! Key-value persistence capability supplied by the host application.
//!
//! The engine never persists anything on its own; callers that want history
//! to survive a restart pass a store to the engine explicitly.

pub mod in_memory;

use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Debug, Display};
use std::sync::Arc;

pub use in_memory::InMemoryStore;

/// Error type for key-value store operations
#[derive(Debug)]
pub enum StoreError {
    /// Error occurred during a store operation
    StorageError(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::StorageError(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl Error for StoreError {}

/// Trait defining the interface for key-value stores
#[async_trait]
pub trait KeyValueStore: Send + Sync + Debug {
    /// Store a value under the given key, replacing any previous value
    async fn save(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Load the value stored under the given key
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remove the value stored under the given key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List keys starting with the given prefix
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Type alias for Arc-wrapped KeyValueStore trait objects
pub type KeyValueStoreRef = Arc<dyn KeyValueStore>;
