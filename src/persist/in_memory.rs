use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::storage::{Storage, StorageError};

/// Storage backed by a shared `HashMap`. Clones see the same items.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    items: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items<K, V>(items: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        InMemoryStorage {
            items: Arc::new(RwLock::new(
                items
                    .into_iter()
                    .map(|(key, value)| (key.into(), value.into()))
                    .collect(),
            )),
        }
    }

    pub fn items(&self) -> Result<HashMap<String, String>, StorageError> {
        Ok(self
            .items
            .read()
            .map_err(|_| StorageError::LockPoisoned("read"))?
            .clone())
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .items
            .read()
            .map_err(|_| StorageError::LockPoisoned("read"))?
            .get(key)
            .cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items
            .write()
            .map_err(|_| StorageError::LockPoisoned("write"))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items
            .write()
            .map_err(|_| StorageError::LockPoisoned("remove"))?
            .remove(key);
        Ok(())
    }
}
