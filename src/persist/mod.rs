//! Persistence of selected slices to a key-value storage backend.
//!
//! ```ignore
//! let storage = InMemoryStorage::new();
//! let persistence = Persistence::attach(
//!     &store,
//!     storage.clone(),
//!     PersistConfig::new(["settings"]),
//! )
//! .await?;
//!
//! store.set_value("settings", "theme", Update::value("dark"))?;
//! store.settled().await;
//! persistence.flush().await?;
//! ```

mod in_memory;
mod keys;
mod persistence;
mod storage;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::StoreError;

pub use in_memory::InMemoryStorage;
pub use keys::StorageInfo;
pub use persistence::{Persistence, SUBSCRIBER_ID};
pub use storage::{Storage, StorageError};

pub const DEFAULT_PREFIX: &str = "estate:";

/// Which slices to persist and how their storage keys are named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    pub slices: Vec<String>,
    pub prefix: String,
}

impl Default for PersistConfig {
    fn default() -> Self {
        PersistConfig {
            slices: Vec::new(),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl PersistConfig {
    pub fn new<S: Into<String>>(slices: impl IntoIterator<Item = S>) -> Self {
        PersistConfig {
            slices: slices.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// `{prefix}{slice}:{key}`
    pub fn storage_key(&self, slice: &str, key: &str) -> String {
        format!("{}{}:{}", self.prefix, slice, key)
    }

    /// Key under which the list of written storage keys is kept.
    pub fn registry_key(&self) -> String {
        format!("{}__keys", self.prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    Store(StoreError),
    Storage(StorageError),
    /// The background writer has stopped.
    Detached,
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Store(err) => write!(f, "store error: {}", err),
            PersistError::Storage(err) => write!(f, "storage error: {}", err),
            PersistError::Detached => write!(f, "persistence writer is no longer running"),
        }
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersistError::Store(err) => Some(err),
            PersistError::Storage(err) => Some(err),
            PersistError::Detached => None,
        }
    }
}

impl From<StoreError> for PersistError {
    fn from(err: StoreError) -> Self {
        PersistError::Store(err)
    }
}

impl From<StorageError> for PersistError {
    fn from(err: StorageError) -> Self {
        PersistError::Storage(err)
    }
}
