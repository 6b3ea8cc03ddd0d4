//! Setter payloads.

use std::fmt;
use std::future::Future;

use futures_util::future::{self, BoxFuture, FutureExt};

use crate::value::Value;

pub type UpdateError = Box<dyn std::error::Error + Send + Sync>;

pub type UpdateFuture = BoxFuture<'static, Result<Value, UpdateError>>;

type UpdaterFn = Box<dyn FnOnce(Value) -> UpdateFuture + Send>;

/// What a setter call does to a key: replace it, or compute the next value
/// from the latest known one.
///
/// The updater receives the value as it stands after every update queued
/// before it, even when those have not been committed yet.
pub enum Update {
    Constant(Value),
    Updater(UpdaterFn),
}

impl Update {
    pub fn value(value: impl Into<Value>) -> Self {
        Update::Constant(value.into())
    }

    /// Synchronous update of the previous value.
    pub fn with<F, V>(f: F) -> Self
    where
        F: FnOnce(Value) -> V + Send + 'static,
        V: Into<Value> + 'static,
    {
        Update::Updater(Box::new(move |previous: Value| {
            async move { Ok::<Value, UpdateError>(f(previous).into()) }.boxed()
        }))
    }

    /// Synchronous, fallible update. An error drops this update.
    pub fn try_with<F, V, E>(f: F) -> Self
    where
        F: FnOnce(Value) -> Result<V, E> + Send + 'static,
        V: Into<Value> + 'static,
        E: Into<UpdateError> + 'static,
    {
        Update::Updater(Box::new(move |previous: Value| {
            async move {
                let result: Result<Value, UpdateError> =
                    f(previous).map(Into::into).map_err(Into::into);
                result
            }
            .boxed()
        }))
    }

    /// Asynchronous update. Later updates wait for this one to resolve.
    pub fn with_async<F, Fut, V, E>(f: F) -> Self
    where
        F: FnOnce(Value) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        V: Into<Value> + 'static,
        E: Into<UpdateError> + 'static,
    {
        Update::Updater(Box::new(move |previous: Value| {
            async move {
                let result: Result<Value, UpdateError> =
                    f(previous).await.map(Into::into).map_err(Into::into);
                result
            }
            .boxed()
        }))
    }

    /// The updater runs inside the returned future, so a panic in it
    /// surfaces when the future is polled.
    pub(crate) fn resolve(self, previous: Value) -> UpdateFuture {
        match self {
            Update::Constant(value) => future::ready(Ok(value)).boxed(),
            Update::Updater(f) => f(previous),
        }
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Update::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Update::Updater(_) => f.write_str("Updater(..)"),
        }
    }
}

/// Options for setter calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOpts {
    /// Notify listeners even when the committed value did not change.
    pub force: bool,
}

impl SetOpts {
    pub fn force() -> Self {
        Self { force: true }
    }
}

/// A queued setter call.
#[derive(Debug)]
pub(crate) struct PendingUpdate {
    pub slice: String,
    pub key: String,
    pub update: Update,
    pub force: bool,
}
