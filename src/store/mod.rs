//! The store handle.
//!
//! A [`Store`] is built once by [`StoreBuilder`] and cloned into whatever
//! needs it; every clone drives the same slices, queue and listeners.
//!
//! ```ignore
//! let store = Store::builder()
//!     .slice("user", [("name", Value::from("John")), ("age", Value::from(30))])
//!     .build()?;
//!
//! store.subscribe("user", "name", Listener::new(|args| println!("{} changed", args.key)))?;
//! store.set_value("user", "name", Update::value("Jane"))?;
//! store.set_value("user", "age", Update::with(|age| age.as_i64().unwrap_or(0) + 1))?;
//! store.settled().await;
//! ```

mod builder;
mod error;
mod state;

use std::sync::{Arc, Weak};

use crate::engine::{BatchPhase, Engine, PendingUpdate, SetOpts, Update};
use crate::listener::{Listener, ListenerId, Subscription};
use crate::middleware::Middleware;
use crate::value::Value;

pub use builder::{SliceState, StoreBuilder};
pub use error::StoreError;
pub(crate) use state::KeyedState;
pub use state::{Slice, Snapshot, StoreView};

#[derive(Clone)]
pub struct Store {
    engine: Arc<Engine>,
    initial: Arc<Snapshot>,
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    pub(crate) fn from_parts(engine: Engine, initial: Snapshot) -> Self {
        Store {
            engine: Arc::new(engine),
            initial: Arc::new(initial),
        }
    }

    pub(crate) fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// A handle that does not keep the store alive. Listeners that need the
    /// store should capture this instead of a clone.
    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            engine: Arc::downgrade(&self.engine),
            initial: Arc::clone(&self.initial),
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Committed value. Values queued but not yet committed are not visible.
    pub fn get(&self, slice: &str, key: &str) -> Result<Arc<Value>, StoreError> {
        self.engine.state()?.get(slice, key).cloned()
    }

    /// Deep copy of the committed value.
    pub fn get_clone(&self, slice: &str, key: &str) -> Result<Value, StoreError> {
        self.get(slice, key).map(|value| Value::clone(&value))
    }

    pub fn get_slice(&self, slice: &str) -> Result<Slice, StoreError> {
        self.engine.state()?.slice(slice)
    }

    pub fn get_all(&self) -> Result<Snapshot, StoreError> {
        Ok(self.engine.state()?.snapshot())
    }

    pub fn contains(&self, slice: &str, key: &str) -> bool {
        self.engine
            .state()
            .map(|state| state.contains(slice, key))
            .unwrap_or(false)
    }

    pub fn slices(&self) -> Vec<String> {
        self.engine
            .state()
            .map(|state| state.slice_names())
            .unwrap_or_default()
    }

    pub fn keys(&self, slice: &str) -> Result<Vec<String>, StoreError> {
        self.engine.state()?.keys(slice)
    }

    /// Typed accessor for a slice declared with `#[derive(Slice)]`.
    pub fn slice_of<S: SliceState>(&self) -> S::Accessor {
        S::accessor(self.clone())
    }

    /// The state the store was built with.
    pub fn initial(&self) -> &Snapshot {
        &self.initial
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub fn set_value(&self, slice: &str, key: &str, update: Update) -> Result<(), StoreError> {
        self.set_value_with(slice, key, update, SetOpts::default())
    }

    pub fn set_value_with(
        &self,
        slice: &str,
        key: &str,
        update: Update,
        opts: SetOpts,
    ) -> Result<(), StoreError> {
        self.engine.enqueue(vec![PendingUpdate {
            slice: slice.to_string(),
            key: key.to_string(),
            update,
            force: opts.force,
        }])
    }

    /// Queue one update per key. Nothing is queued if any key is unknown.
    pub fn set_slice<K, I>(&self, slice: &str, updates: I) -> Result<(), StoreError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Update)>,
    {
        self.set_slice_with(slice, updates, SetOpts::default())
    }

    pub fn set_slice_with<K, I>(&self, slice: &str, updates: I, opts: SetOpts) -> Result<(), StoreError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Update)>,
    {
        self.engine.state()?.keys(slice)?;
        let units = updates
            .into_iter()
            .map(|(key, update)| PendingUpdate {
                slice: slice.to_string(),
                key: key.into(),
                update,
                force: opts.force,
            })
            .collect();
        self.engine.enqueue(units)
    }

    /// Queue the initial values of a slice back in.
    pub fn reset(&self, slice: &str) -> Result<(), StoreError> {
        let initial = self
            .initial
            .get(slice)
            .ok_or_else(|| StoreError::UnknownSlice {
                slice: slice.to_string(),
            })?;
        self.set_slice(
            slice,
            initial
                .iter()
                .map(|(key, value)| (key.clone(), Update::Constant(value.clone()))),
        )
    }

    pub fn reset_all(&self) -> Result<(), StoreError> {
        for slice in self.initial.keys() {
            self.reset(slice)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Middleware
    // ------------------------------------------------------------------

    /// Applied to every later commit to the pair, replacing any earlier one.
    pub fn register_middleware(
        &self,
        slice: &str,
        key: &str,
        middleware: Middleware,
    ) -> Result<(), StoreError> {
        self.engine.state()?.ensure(slice, key)?;
        self.engine
            .middlewares_mut()?
            .register(slice, key, middleware);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    pub fn subscribe(
        &self,
        slice: &str,
        key: &str,
        listener: Listener,
    ) -> Result<Subscription, StoreError> {
        self.engine.state()?.ensure(slice, key)?;
        let registry = self.engine.listeners();
        let id = registry
            .write()
            .map_err(|_| StoreError::LockPoisoned("subscribe"))?
            .insert(slice, key, listener);
        Ok(Subscription::new(id, registry))
    }

    /// Subscribe the listener to every key of the slice. Each key gets its
    /// own entry, so a once listener fires once per key.
    pub fn subscribe_slice(
        &self,
        slice: &str,
        listener: Listener,
    ) -> Result<Vec<Subscription>, StoreError> {
        let keys = self.keys(slice)?;
        let registry = self.engine.listeners();
        let mut registry_guard = registry
            .write()
            .map_err(|_| StoreError::LockPoisoned("subscribe slice"))?;
        Ok(keys
            .iter()
            .map(|key| {
                let id = registry_guard.insert(slice, key, listener.clone());
                Subscription::new(id, registry)
            })
            .collect())
    }

    pub fn unsubscribe(&self, id: &ListenerId) -> bool {
        self.engine
            .listeners()
            .write()
            .map(|mut registry| registry.remove(id))
            .unwrap_or(false)
    }

    pub fn listener_count(&self) -> usize {
        self.engine
            .listeners()
            .read()
            .map(|registry| registry.len())
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    pub fn phase(&self) -> BatchPhase {
        self.engine.phase()
    }

    pub fn pending(&self) -> usize {
        self.engine.pending_len()
    }

    /// Wait until every queued update is committed and dispatched.
    pub async fn settled(&self) {
        let mut phase = self.engine.watch_phase();
        // The sender lives as long as the engine, which `self` keeps alive.
        let _ = phase.wait_for(|phase| *phase == BatchPhase::Idle).await;
    }
}

#[derive(Clone)]
pub struct WeakStore {
    engine: Weak<Engine>,
    initial: Arc<Snapshot>,
}

impl WeakStore {
    pub fn upgrade(&self) -> Option<Store> {
        self.engine.upgrade().map(|engine| Store {
            engine,
            initial: Arc::clone(&self.initial),
        })
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("slices", &self.slices())
            .field("phase", &self.phase())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
