//! Per-key transforms applied to a value right before it is committed.
//!
//! A middleware is either a constant that replaces whatever was set, or a
//! function of the incoming value. A failing function never blocks the
//! commit: the failure is logged and the incoming value is committed as-is.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::store::StoreView;
use crate::value::Value;

pub type MiddlewareError = Box<dyn std::error::Error + Send + Sync>;

/// Arguments handed to a transform middleware.
pub struct MiddlewareArgs<'a> {
    pub value: &'a Value,
    pub slice: &'a str,
    pub key: &'a str,
    /// Committed values at the time of the call.
    pub store: &'a StoreView<'a>,
}

type TransformFn = dyn Fn(MiddlewareArgs<'_>) -> Result<Value, MiddlewareError> + Send + Sync;

#[derive(Clone)]
pub enum Middleware {
    /// Commit this value instead of the incoming one.
    Value(Value),
    Transform(Arc<TransformFn>),
}

impl Middleware {
    pub fn value(value: impl Into<Value>) -> Self {
        Middleware::Value(value.into())
    }

    /// `args.store` is a copy of the committed state, so the transform may
    /// call back into the store.
    pub fn transform<F>(f: F) -> Self
    where
        F: Fn(MiddlewareArgs<'_>) -> Value + Send + Sync + 'static,
    {
        Middleware::Transform(Arc::new(
            move |args: MiddlewareArgs<'_>| -> Result<Value, MiddlewareError> { Ok(f(args)) },
        ))
    }

    pub fn try_transform<F, E>(f: F) -> Self
    where
        F: Fn(MiddlewareArgs<'_>) -> Result<Value, E> + Send + Sync + 'static,
        E: Into<MiddlewareError>,
    {
        Middleware::Transform(Arc::new(
            move |args: MiddlewareArgs<'_>| -> Result<Value, MiddlewareError> {
                f(args).map_err(Into::into)
            },
        ))
    }

    /// Run the middleware. Errors and panics fall back to the incoming value.
    pub(crate) fn apply(
        &self,
        slice: &str,
        key: &str,
        value: Arc<Value>,
        store: &StoreView<'_>,
    ) -> Arc<Value> {
        match self {
            Middleware::Value(replacement) => Arc::new(replacement.clone()),
            Middleware::Transform(f) => {
                let args = MiddlewareArgs {
                    value: &value,
                    slice,
                    key,
                    store,
                };
                match catch_unwind(AssertUnwindSafe(|| f(args))) {
                    Ok(Ok(transformed)) => Arc::new(transformed),
                    Ok(Err(err)) => {
                        tracing::error!(slice, key, error = %err, "middleware failed, committing original value");
                        value
                    }
                    Err(_) => {
                        tracing::error!(slice, key, "middleware panicked, committing original value");
                        value
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Middleware::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Middleware::Transform(_) => f.write_str("Transform(..)"),
        }
    }
}

/// Registered middlewares by (slice, key).
#[derive(Default)]
pub(crate) struct Middlewares {
    entries: HashMap<(String, String), Middleware>,
}

impl Middlewares {
    /// Register a middleware, replacing any earlier one for the same pair.
    pub fn register(&mut self, slice: &str, key: &str, middleware: Middleware) {
        self.entries
            .insert((slice.to_string(), key.to_string()), middleware);
    }

    pub fn get(&self, slice: &str, key: &str) -> Option<Middleware> {
        self.entries
            .get(&(slice.to_string(), key.to_string()))
            .cloned()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
