use std::fmt;

use async_trait::async_trait;

/// Async key-value backend holding serialized values.
///
/// Synchronous backends implement the methods by returning immediately.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Backends that cannot delete may keep the default.
    async fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    Backend(String),
    Serde(String),
    LockPoisoned(&'static str),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Backend(message) => write!(f, "storage backend error: {}", message),
            StorageError::Serde(message) => write!(f, "serialization error: {}", message),
            StorageError::LockPoisoned(operation) => {
                write!(f, "storage lock poisoned during {}", operation)
            }
        }
    }
}

impl std::error::Error for StorageError {}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serde(err.to_string())
    }
}
