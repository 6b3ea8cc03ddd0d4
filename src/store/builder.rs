use tokio::runtime::Handle;

use super::{KeyedState, Slice, Snapshot, Store, StoreError};
use crate::engine::Engine;
use crate::middleware::{Middleware, Middlewares};
use crate::value::{codec, Value};

/// A struct whose fields are the keys of one slice.
///
/// Implemented by `#[derive(Slice)]`, which also generates the typed
/// accessor returned by [`SliceState::accessor`].
pub trait SliceState {
    /// Slice name in the store.
    const NAME: &'static str;

    type Accessor;

    fn keys() -> &'static [&'static str];

    fn into_values(self) -> Vec<(String, Value)>;

    fn accessor(store: Store) -> Self::Accessor;
}

/// Builds a [`Store`]: initial slices, middlewares and the runtime that
/// drives update batches.
#[derive(Default)]
pub struct StoreBuilder {
    state: Snapshot,
    middlewares: Vec<(String, String, Middleware)>,
    runtime: Option<Handle>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a slice. Keys given here are the only keys the slice will ever have.
    pub fn slice<K, V>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let slice: &mut Slice = self.state.entry(name.into()).or_default();
        for (key, value) in values {
            slice.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_slice<S: SliceState>(self, state: S) -> Self {
        self.slice(S::NAME, state.into_values())
    }

    pub fn state(mut self, snapshot: Snapshot) -> Self {
        for (name, values) in snapshot {
            self.state.entry(name).or_default().extend(values);
        }
        self
    }

    /// Add slices from a JSON object of objects. Tagged maps, sets and dates
    /// are revived.
    pub fn state_json(mut self, json: serde_json::Value) -> Result<Self, StoreError> {
        let serde_json::Value::Object(slices) = json else {
            return Err(StoreError::InvalidState(
                "root state must be an object of slices".into(),
            ));
        };
        for (name, values) in slices {
            let serde_json::Value::Object(values) = values else {
                return Err(StoreError::InvalidState(format!(
                    "slice {} must be an object of keys",
                    name
                )));
            };
            let slice = self.state.entry(name).or_default();
            for (key, value) in values {
                slice.insert(key, codec::revive(value));
            }
        }
        Ok(self)
    }

    pub fn middleware(mut self, slice: &str, key: &str, middleware: Middleware) -> Self {
        self.middlewares
            .push((slice.to_string(), key.to_string(), middleware));
        self
    }

    /// Runtime for the drain task. Defaults to the runtime `build` is called on.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<Store, StoreError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| StoreError::NoRuntime)?,
        };

        let shape = KeyedState::new(self.state.clone());
        let mut middlewares = Middlewares::default();
        for (slice, key, middleware) in self.middlewares {
            shape.ensure(&slice, &key)?;
            middlewares.register(&slice, &key, middleware);
        }

        tracing::debug!(slices = self.state.len(), "store built");
        let engine = Engine::new(self.state.clone(), middlewares, runtime);
        Ok(Store::from_parts(engine, self.state))
    }
}
