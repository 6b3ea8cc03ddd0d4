//! Re-emits committed changes on an [`EventEmitter`].
//!
//! Every change to `slice.key` is emitted as the event `"slice:key"` with a
//! JSON [`ChangeEvent`] payload.
//!
//! ```ignore
//! let bridge = EmitterBridge::attach(&store, EventEmitter::new())?;
//! bridge.on("user:name", |payload: String| {
//!     let event: ChangeEvent = serde_json::from_str(&payload).unwrap();
//!     println!("name is now {:?}", event.value);
//! })?;
//! ```

use std::sync::{Arc, Mutex};

use event_emitter_rs::EventEmitter;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::listener::{Listener, ListenerArgs, Subscription};
use crate::store::{Store, StoreError, WeakStore};
use crate::value::Value;

/// Prefix of the subscriber ids the bridge registers. Each attach adds a
/// unique suffix.
pub const SUBSCRIBER_ID: &str = "__emitter";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub slice: String,
    pub key: String,
    pub update_id: String,
    pub value: Value,
}

pub struct EmitterBridge {
    emitter: Arc<Mutex<EventEmitter>>,
    subscriptions: Vec<Subscription>,
}

impl EmitterBridge {
    /// Subscribe to every key of every slice and forward changes to `emitter`.
    pub fn attach(store: &Store, emitter: EventEmitter) -> Result<Self, StoreError> {
        let emitter = Arc::new(Mutex::new(emitter));
        let subscriber = format!("{}:{}", SUBSCRIBER_ID, Ulid::new());
        let mut subscriptions = Vec::new();
        for slice in store.slices() {
            let listener = forward(store.downgrade(), Arc::clone(&emitter), &subscriber);
            subscriptions.extend(store.subscribe_slice(&slice, listener)?);
        }
        tracing::debug!(listeners = subscriptions.len(), "emitter bridge attached");
        Ok(EmitterBridge {
            emitter,
            subscriptions,
        })
    }

    pub fn event_name(slice: &str, key: &str) -> String {
        format!("{}:{}", slice, key)
    }

    /// Register a callback for an event. Returns the emitter's listener id.
    pub fn on<F>(&self, event: &str, listener: F) -> Result<String, StoreError>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        Ok(self
            .emitter
            .lock()
            .map_err(|_| StoreError::LockPoisoned("emitter"))?
            .on(event, listener))
    }

    pub fn emitter(&self) -> Arc<Mutex<EventEmitter>> {
        Arc::clone(&self.emitter)
    }

    /// Stop forwarding changes.
    pub fn detach(mut self) {
        self.unsubscribe_all();
    }

    fn unsubscribe_all(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
    }
}

impl Drop for EmitterBridge {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

fn forward(store: WeakStore, emitter: Arc<Mutex<EventEmitter>>, subscriber: &str) -> Listener {
    Listener::new(move |args: &ListenerArgs| {
        let Some(store) = store.upgrade() else {
            return;
        };
        let value = match store.get(&args.slice, &args.key) {
            Ok(value) => Value::clone(&value),
            Err(err) => {
                tracing::warn!(slice = %args.slice, key = %args.key, error = %err, "could not read changed value");
                return;
            }
        };
        let event = ChangeEvent {
            slice: args.slice.clone(),
            key: args.key.clone(),
            update_id: args.update_id.to_string(),
            value,
        };
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(slice = %args.slice, key = %args.key, error = %err, "could not serialize change");
                return;
            }
        };
        match emitter.lock() {
            Ok(mut emitter) => {
                emitter.emit(&EmitterBridge::event_name(&args.slice, &args.key), payload);
            }
            Err(_) => tracing::error!("event emitter lock poisoned"),
        }
    })
    .id(subscriber)
}
