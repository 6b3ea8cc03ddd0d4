//! Change listeners and their registry.
//!
//! A listener is identified by `(slice, key, subscriber)`. Subscribing again
//! with the same subscriber id replaces the earlier entry in place, keeping
//! its position in the notification order.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use ulid::Ulid;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId {
    slice: String,
    key: String,
    subscriber: String,
}

impl ListenerId {
    pub fn new(
        slice: impl Into<String>,
        key: impl Into<String>,
        subscriber: impl Into<String>,
    ) -> Self {
        ListenerId {
            slice: slice.into(),
            key: key.into(),
            subscriber: subscriber.into(),
        }
    }

    pub fn slice(&self) -> &str {
        &self.slice
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.slice, self.key, self.subscriber)
    }
}

/// Passed to every callback invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerArgs {
    pub slice: String,
    pub key: String,
    /// Fresh for every invocation.
    pub update_id: Ulid,
}

pub type Callback = dyn Fn(&ListenerArgs) + Send + Sync;

/// Returns true when two values should be treated as unchanged.
pub type Comparator = dyn Fn(&Value, &Value) -> bool + Send + Sync;

/// A listener definition, turned into a registry entry on subscribe.
///
/// ```ignore
/// let sub = store.subscribe(
///     "user",
///     "name",
///     Listener::new(|args| println!("{} changed", args.key))
///         .id("header")
///         .compare(|old, new| old.as_str() == new.as_str())
///         .once(),
/// )?;
/// ```
#[derive(Clone)]
pub struct Listener {
    subscriber: Option<String>,
    callback: Arc<Callback>,
    comparator: Option<Arc<Comparator>>,
    once: bool,
}

impl Listener {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&ListenerArgs) + Send + Sync + 'static,
    {
        Listener {
            subscriber: None,
            callback: Arc::new(callback),
            comparator: None,
            once: false,
        }
    }

    /// Subscriber id. A random one is generated when unset.
    pub fn id(mut self, subscriber: impl Into<String>) -> Self {
        self.subscriber = Some(subscriber.into());
        self
    }

    pub fn compare<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.comparator = Some(Arc::new(comparator));
        self
    }

    /// Remove the listener after its first invocation.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn is_once(&self) -> bool {
        self.once
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("subscriber", &self.subscriber)
            .field("comparator", &self.comparator.is_some())
            .field("once", &self.once)
            .finish()
    }
}

pub(crate) struct ListenerEntry {
    id: ListenerId,
    callback: Arc<Callback>,
    comparator: Option<Arc<Comparator>>,
    once: bool,
    fired: AtomicBool,
}

impl ListenerEntry {
    pub fn id(&self) -> &ListenerId {
        &self.id
    }

    pub fn is_once(&self) -> bool {
        self.once
    }

    /// True when the comparator reports the values as equal.
    pub fn suppresses(&self, old: &Value, new: &Value) -> bool {
        match &self.comparator {
            Some(comparator) => {
                match catch_unwind(AssertUnwindSafe(|| comparator(old, new))) {
                    Ok(equal) => equal,
                    Err(_) => {
                        tracing::error!(listener = %self.id, "comparator panicked, notifying anyway");
                        false
                    }
                }
            }
            None => false,
        }
    }

    /// Reserve this entry for an invocation. A once entry can be claimed a
    /// single time.
    pub fn claim(&self) -> bool {
        !self.once || !self.fired.swap(true, Ordering::SeqCst)
    }

    pub fn invoke(&self, args: &ListenerArgs) {
        if catch_unwind(AssertUnwindSafe(|| (self.callback)(args))).is_err() {
            tracing::error!(listener = %self.id, "listener panicked");
        }
    }
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    entries: HashMap<(String, String), Vec<Arc<ListenerEntry>>>,
}

impl ListenerRegistry {
    pub fn insert(&mut self, slice: &str, key: &str, listener: Listener) -> ListenerId {
        let subscriber = listener
            .subscriber
            .unwrap_or_else(|| Ulid::new().to_string());
        let id = ListenerId::new(slice, key, subscriber);
        let entry = Arc::new(ListenerEntry {
            id: id.clone(),
            callback: listener.callback,
            comparator: listener.comparator,
            once: listener.once,
            fired: AtomicBool::new(false),
        });

        let list = self
            .entries
            .entry((slice.to_string(), key.to_string()))
            .or_default();
        match list.iter().position(|existing| existing.id == id) {
            Some(index) => list[index] = entry,
            None => list.push(entry),
        }
        id
    }

    pub fn remove(&mut self, id: &ListenerId) -> bool {
        self.remove_where(&id.slice, &id.key, |entry| entry.id == *id)
    }

    /// Remove this exact entry, leaving a newer entry with the same id alone.
    pub fn remove_entry(&mut self, entry: &Arc<ListenerEntry>) -> bool {
        self.remove_where(&entry.id.slice, &entry.id.key, |existing| {
            Arc::ptr_eq(existing, entry)
        })
    }

    fn remove_where<P>(&mut self, slice: &str, key: &str, predicate: P) -> bool
    where
        P: Fn(&Arc<ListenerEntry>) -> bool,
    {
        let pair = (slice.to_string(), key.to_string());
        let Some(list) = self.entries.get_mut(&pair) else {
            return false;
        };
        let before = list.len();
        list.retain(|entry| !predicate(entry));
        let removed = list.len() != before;
        if list.is_empty() {
            self.entries.remove(&pair);
        }
        removed
    }

    pub fn contains(&self, id: &ListenerId) -> bool {
        self.entries
            .get(&(id.slice.clone(), id.key.clone()))
            .is_some_and(|list| list.iter().any(|entry| entry.id == *id))
    }

    pub fn contains_entry(&self, entry: &Arc<ListenerEntry>) -> bool {
        self.entries
            .get(&(entry.id.slice.clone(), entry.id.key.clone()))
            .is_some_and(|list| list.iter().any(|existing| Arc::ptr_eq(existing, entry)))
    }

    /// Entries for a pair in registration order.
    pub fn matching(&self, slice: &str, key: &str) -> Vec<Arc<ListenerEntry>> {
        self.entries
            .get(&(slice.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

/// Handle returned by `subscribe`. Dropping it keeps the listener registered.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: ListenerId,
    registry: Weak<RwLock<ListenerRegistry>>,
}

impl Subscription {
    pub(crate) fn new(id: ListenerId, registry: &Arc<RwLock<ListenerRegistry>>) -> Self {
        Subscription {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> &ListenerId {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .and_then(|registry| registry.read().ok().map(|r| r.contains(&self.id)))
            .unwrap_or(false)
    }

    /// Remove the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => match registry.write() {
                Ok(mut registry) => registry.remove(&self.id),
                Err(_) => false,
            },
            None => false,
        }
    }
}
