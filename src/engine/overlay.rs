//! Batch-scoped view of values decided but not yet committed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::store::{KeyedState, StoreError};
use crate::value::Value;

/// A slice is copied from the committed state the first time the batch
/// writes into it; later reads of that slice are served from the copy.
#[derive(Default)]
pub(crate) struct Overlay {
    slices: HashMap<String, BTreeMap<String, Arc<Value>>>,
}

impl Overlay {
    pub fn get(&self, slice: &str, key: &str) -> Option<Arc<Value>> {
        self.slices.get(slice)?.get(key).cloned()
    }

    /// Latest known value: overlay first, then committed.
    pub fn latest(
        &self,
        committed: &KeyedState,
        slice: &str,
        key: &str,
    ) -> Result<Arc<Value>, StoreError> {
        match self.get(slice, key) {
            Some(value) => Ok(value),
            None => committed.get(slice, key).cloned(),
        }
    }

    pub fn write(
        &mut self,
        committed: &KeyedState,
        slice: &str,
        key: &str,
        value: Arc<Value>,
    ) -> Result<(), StoreError> {
        if !self.slices.contains_key(slice) {
            let copy = committed.slice_shared(slice)?;
            self.slices.insert(slice.to_string(), copy);
        }
        if let Some(values) = self.slices.get_mut(slice) {
            values.insert(key.to_string(), value);
        }
        Ok(())
    }

    pub fn touched(&self) -> usize {
        self.slices.len()
    }

    pub fn clear(&mut self) {
        self.slices.clear();
    }
}
