//! Reactive in-process state store.
//!
//! State is organised in named slices of keys. Setters queue updates that
//! are resolved in order, committed together and announced to listeners
//! once per changed key.

extern crate self as estate_rust;

mod engine;
mod listener;
mod middleware;
mod store;
mod value;

#[cfg(feature = "emitter")]
mod emitter;
#[cfg(feature = "persist")]
pub mod persist;

pub use engine::{BatchPhase, SetOpts, Update, UpdateError, UpdateFuture};
pub use listener::{Callback, Comparator, Listener, ListenerArgs, ListenerId, Subscription};
pub use middleware::{Middleware, MiddlewareArgs, MiddlewareError};
pub use store::{
    Slice, SliceState, Snapshot, Store, StoreBuilder, StoreError, StoreView,
    WeakStore,
};
pub use value::{codec, Value};

// Derive macro for typed slices
pub use estate_rust_macros::Slice;

#[cfg(feature = "emitter")]
pub use emitter::{ChangeEvent, EmitterBridge};

// Re-export the EventEmitter from the event_emitter_rs crate
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
