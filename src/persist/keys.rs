//! Registry of every storage key written, kept in storage itself so a later
//! process can clean up after an earlier one.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use super::storage::{Storage, StorageError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageInfo {
    pub keys: Vec<String>,
    /// Sum of key and value lengths in bytes.
    pub total_size: usize,
    pub key_count: usize,
}

pub(crate) struct KeyRegistry {
    storage: Arc<dyn Storage>,
    key: String,
    // Serializes read-modify-write cycles on the registry entry.
    lock: Mutex<()>,
}

impl KeyRegistry {
    pub fn new(storage: Arc<dyn Storage>, key: String) -> Self {
        KeyRegistry {
            storage,
            key,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<String>, StorageError> {
        let Some(text) = self.storage.get_item(&self.key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&text) {
            Ok(keys) => Ok(keys),
            Err(err) => {
                tracing::warn!(registry = %self.key, error = %err, "unreadable key registry, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, keys: &[String]) -> Result<(), StorageError> {
        let text = serde_json::to_string(keys)?;
        self.storage.set_item(&self.key, &text).await
    }

    pub async fn stored_keys(&self) -> Result<Vec<String>, StorageError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    pub async fn add(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut keys = self.load().await?;
        if keys.iter().any(|k| k == key) {
            return Ok(());
        }
        keys.push(key.to_string());
        self.save(&keys).await?;
        tracing::debug!(key, "registered storage key");
        Ok(())
    }

    /// Remove `extra` plus every registered key matching `predicate`, from
    /// both storage and the registry. Returns the removed keys.
    pub async fn remove_matching<F>(
        &self,
        extra: Vec<String>,
        predicate: F,
    ) -> Result<Vec<String>, StorageError>
    where
        F: Fn(&str) -> bool + Send,
    {
        let _guard = self.lock.lock().await;
        let keys = self.load().await?;

        let mut removed = extra;
        let mut kept = Vec::with_capacity(keys.len());
        for key in keys {
            if removed.contains(&key) {
                continue;
            }
            if predicate(&key) {
                removed.push(key);
            } else {
                kept.push(key);
            }
        }

        for key in &removed {
            self.storage.remove_item(key).await?;
            tracing::debug!(key = %key, "removed storage key");
        }
        self.save(&kept).await?;
        Ok(removed)
    }

    /// Remove every registered key and the registry itself.
    pub async fn clear_all(&self) -> Result<usize, StorageError> {
        let _guard = self.lock.lock().await;
        let keys = self.load().await?;
        for key in &keys {
            self.storage.remove_item(key).await?;
        }
        self.storage.remove_item(&self.key).await?;
        tracing::debug!(count = keys.len(), "cleared all storage keys");
        Ok(keys.len())
    }

    pub async fn info(&self) -> Result<StorageInfo, StorageError> {
        let _guard = self.lock.lock().await;
        let keys = self.load().await?;
        let mut total_size = 0;
        for key in &keys {
            if let Some(value) = self.storage.get_item(key).await? {
                total_size += key.len() + value.len();
            }
        }
        Ok(StorageInfo {
            key_count: keys.len(),
            keys,
            total_size,
        })
    }
}
