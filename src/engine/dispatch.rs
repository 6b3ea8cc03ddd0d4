//! Listener notification for a committed batch.

use std::sync::{Arc, RwLock};

use ulid::Ulid;

use crate::listener::{ListenerArgs, ListenerRegistry};
use crate::value::Value;

/// One (slice, key) pair touched by a batch.
#[derive(Debug, Clone)]
pub(crate) struct Change {
    pub slice: String,
    pub key: String,
    /// Committed value before the batch's first write to the pair.
    pub old: Arc<Value>,
    pub new: Arc<Value>,
    pub force: bool,
}

impl Change {
    pub fn changed(&self) -> bool {
        !Arc::ptr_eq(&self.old, &self.new) && self.old != self.new
    }
}

/// Notify listeners for every change. Callbacks run with no registry lock
/// held, so they may subscribe, unsubscribe or queue more updates.
///
/// Returns the number of callbacks invoked.
pub(crate) fn dispatch(registry: &RwLock<ListenerRegistry>, changes: &[Change]) -> usize {
    let mut notified = 0;
    for change in changes {
        if !change.force && !change.changed() {
            continue;
        }

        let entries = match registry.read() {
            Ok(registry) => registry.matching(&change.slice, &change.key),
            Err(_) => {
                tracing::error!(slice = %change.slice, key = %change.key, "listener registry poisoned");
                continue;
            }
        };

        for entry in entries {
            // An earlier callback in this pass may have unsubscribed it.
            let live = registry
                .read()
                .map(|registry| registry.contains_entry(&entry))
                .unwrap_or(false);
            if !live || entry.suppresses(&change.old, &change.new) {
                continue;
            }
            if !entry.claim() {
                continue;
            }
            if entry.is_once() {
                if let Ok(mut registry) = registry.write() {
                    registry.remove_entry(&entry);
                }
            }

            let args = ListenerArgs {
                slice: change.slice.clone(),
                key: change.key.clone(),
                update_id: Ulid::new(),
            };
            tracing::trace!(listener = %entry.id(), update_id = %args.update_id, "notifying listener");
            entry.invoke(&args);
            notified += 1;
        }
    }
    notified
}
