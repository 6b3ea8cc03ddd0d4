//! Committed values, one map of keys per slice.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::StoreError;
use crate::value::Value;

/// Values of one slice, by key.
pub type Slice = BTreeMap<String, Value>;

/// Values of every slice, by slice name.
pub type Snapshot = BTreeMap<String, Slice>;

/// The set of slices and keys is fixed at construction; only values change.
#[derive(Clone)]
pub(crate) struct KeyedState {
    slices: BTreeMap<String, BTreeMap<String, Arc<Value>>>,
}

impl KeyedState {
    pub fn new(initial: Snapshot) -> Self {
        let slices = initial
            .into_iter()
            .map(|(slice, values)| {
                let values = values
                    .into_iter()
                    .map(|(key, value)| (key, Arc::new(value)))
                    .collect();
                (slice, values)
            })
            .collect();
        KeyedState { slices }
    }

    fn slice_entries(&self, slice: &str) -> Result<&BTreeMap<String, Arc<Value>>, StoreError> {
        self.slices
            .get(slice)
            .ok_or_else(|| StoreError::UnknownSlice {
                slice: slice.to_string(),
            })
    }

    pub fn ensure(&self, slice: &str, key: &str) -> Result<(), StoreError> {
        self.get(slice, key).map(|_| ())
    }

    pub fn contains(&self, slice: &str, key: &str) -> bool {
        self.get(slice, key).is_ok()
    }

    pub fn get(&self, slice: &str, key: &str) -> Result<&Arc<Value>, StoreError> {
        self.slice_entries(slice)?
            .get(key)
            .ok_or_else(|| StoreError::UnknownKey {
                slice: slice.to_string(),
                key: key.to_string(),
            })
    }

    pub fn slice(&self, slice: &str) -> Result<Slice, StoreError> {
        Ok(self
            .slice_entries(slice)?
            .iter()
            .map(|(key, value)| (key.clone(), Value::clone(value)))
            .collect())
    }

    /// Shared handles to a slice's values, for the engine's overlay.
    pub fn slice_shared(
        &self,
        slice: &str,
    ) -> Result<BTreeMap<String, Arc<Value>>, StoreError> {
        self.slice_entries(slice).cloned()
    }

    pub fn keys(&self, slice: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.slice_entries(slice)?.keys().cloned().collect())
    }

    pub fn slice_names(&self) -> Vec<String> {
        self.slices.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.slices
            .iter()
            .map(|(slice, values)| {
                let values = values
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::clone(value)))
                    .collect();
                (slice.clone(), values)
            })
            .collect()
    }

    /// Replace a committed value, returning the previous one.
    pub fn commit(
        &mut self,
        slice: &str,
        key: &str,
        value: Arc<Value>,
    ) -> Result<Arc<Value>, StoreError> {
        let slot = self
            .slices
            .get_mut(slice)
            .ok_or_else(|| StoreError::UnknownSlice {
                slice: slice.to_string(),
            })?
            .get_mut(key)
            .ok_or_else(|| StoreError::UnknownKey {
                slice: slice.to_string(),
                key: key.to_string(),
            })?;
        Ok(std::mem::replace(slot, value))
    }
}

/// Read-only view of committed values handed to middleware.
pub struct StoreView<'a> {
    state: &'a KeyedState,
}

impl<'a> StoreView<'a> {
    pub(crate) fn new(state: &'a KeyedState) -> Self {
        StoreView { state }
    }

    pub fn get(&self, slice: &str, key: &str) -> Option<&'a Value> {
        self.state.get(slice, key).ok().map(|value| value.as_ref())
    }

    pub fn slice(&self, slice: &str) -> Option<Slice> {
        self.state.slice(slice).ok()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }
}
