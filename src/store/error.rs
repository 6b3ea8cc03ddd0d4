use std::fmt;

/// Errors surfaced synchronously by [`Store`](super::Store) calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The slice was not part of the initial state.
    UnknownSlice { slice: String },
    /// The key was not part of the slice's initial state.
    UnknownKey { slice: String, key: String },
    /// The initial state could not be interpreted as slices of keys.
    InvalidState(String),
    /// No tokio runtime was available to drive update batches.
    NoRuntime,
    LockPoisoned(&'static str),
}

impl StoreError {
    /// True for errors caused by referencing a slice or key that does not exist.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StoreError::UnknownSlice { .. } | StoreError::UnknownKey { .. }
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::UnknownSlice { slice } => {
                write!(f, "the slice {} does not exist in the store", slice)
            }
            StoreError::UnknownKey { slice, key } => {
                write!(f, "the key {} does not exist in the slice {}", key, slice)
            }
            StoreError::InvalidState(message) => write!(f, "invalid initial state: {}", message),
            StoreError::NoRuntime => write!(f, "no tokio runtime available to drive updates"),
            StoreError::LockPoisoned(operation) => {
                write!(f, "store lock poisoned during {}", operation)
            }
        }
    }
}

impl std::error::Error for StoreError {}
