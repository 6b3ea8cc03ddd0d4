//! Update batching engine.
//!
//! Setter calls push [`PendingUpdate`]s onto a queue. The first push while
//! idle spawns a drain task on the store's runtime; pushes made while a
//! batch is in flight are picked up by that same task.
//!
//! ```text
//!   Idle ──enqueue──▶ Draining ──queue empty──▶ Committing ──▶ Idle
//!                      ▲    │                        │
//!                      └────┘ next unit              └─▶ Draining (units queued
//!                                                         by listeners)
//! ```
//!
//! While draining, one unit is resolved at a time against an [`Overlay`]
//! holding every value already decided in the batch, so a later updater
//! sees earlier results before anything is committed. Once the queue is
//! empty the records are committed in order through middleware, then each
//! touched pair is dispatched once with its pre-batch and final values.
//!
//! An updater that never resolves stalls the queue; wrap slow futures in a
//! timeout.

mod dispatch;
mod overlay;
mod update;

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::listener::ListenerRegistry;
use crate::middleware::Middlewares;
use crate::store::{KeyedState, Snapshot, StoreError, StoreView};
use crate::value::Value;

use dispatch::Change;
use overlay::Overlay;

pub(crate) use update::PendingUpdate;
pub use update::{SetOpts, Update, UpdateError, UpdateFuture};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Idle,
    Draining,
    Committing,
}

struct Queue {
    pending: VecDeque<PendingUpdate>,
    phase: BatchPhase,
}

struct Resolved {
    slice: String,
    key: String,
    value: Arc<Value>,
    force: bool,
}

pub(crate) struct Engine {
    state: RwLock<KeyedState>,
    middlewares: RwLock<Middlewares>,
    listeners: Arc<RwLock<ListenerRegistry>>,
    queue: Mutex<Queue>,
    phase: watch::Sender<BatchPhase>,
    runtime: Handle,
}

impl Engine {
    pub fn new(initial: Snapshot, middlewares: Middlewares, runtime: Handle) -> Self {
        let (phase, _) = watch::channel(BatchPhase::Idle);
        Engine {
            state: RwLock::new(KeyedState::new(initial)),
            middlewares: RwLock::new(middlewares),
            listeners: Arc::new(RwLock::new(ListenerRegistry::default())),
            queue: Mutex::new(Queue {
                pending: VecDeque::new(),
                phase: BatchPhase::Idle,
            }),
            phase,
            runtime,
        }
    }

    pub fn state(&self) -> Result<RwLockReadGuard<'_, KeyedState>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::LockPoisoned("state read"))
    }

    fn state_mut(&self) -> Result<RwLockWriteGuard<'_, KeyedState>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::LockPoisoned("state write"))
    }

    pub fn middlewares_mut(&self) -> Result<RwLockWriteGuard<'_, Middlewares>, StoreError> {
        self.middlewares
            .write()
            .map_err(|_| StoreError::LockPoisoned("middleware registration"))
    }

    pub fn listeners(&self) -> &Arc<RwLock<ListenerRegistry>> {
        &self.listeners
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    // Only the engine mutates the queue and none of its critical sections
    // can panic, so a poisoned guard is still consistent.
    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, queue: &mut Queue, phase: BatchPhase) {
        queue.phase = phase;
        self.phase.send_replace(phase);
    }

    pub fn phase(&self) -> BatchPhase {
        self.queue().phase
    }

    pub fn watch_phase(&self) -> watch::Receiver<BatchPhase> {
        self.phase.subscribe()
    }

    pub fn pending_len(&self) -> usize {
        self.queue().pending.len()
    }

    /// Validate and queue units, starting a drain task when idle. Either all
    /// units are queued or none are.
    pub fn enqueue(self: &Arc<Self>, units: Vec<PendingUpdate>) -> Result<(), StoreError> {
        {
            let state = self.state()?;
            for unit in &units {
                state.ensure(&unit.slice, &unit.key)?;
            }
        }
        if units.is_empty() {
            return Ok(());
        }

        let count = units.len();
        let start = {
            let mut queue = self.queue();
            queue.pending.extend(units);
            let idle = queue.phase == BatchPhase::Idle;
            if idle {
                self.set_phase(&mut queue, BatchPhase::Draining);
            }
            idle
        };
        tracing::debug!(count, start, "updates queued");

        if start {
            let engine = Arc::clone(self);
            self.runtime.spawn(engine.drain());
        }
        Ok(())
    }

    async fn drain(self: Arc<Self>) {
        let mut overlay = Overlay::default();
        let mut resolved: Vec<Resolved> = Vec::new();
        loop {
            tracing::debug!("batch started");
            while let Some(unit) = self.next_pending() {
                let Some(record) = self.resolve(&overlay, unit).await else {
                    continue;
                };
                if let Err(err) = self.stage(&mut overlay, &record) {
                    tracing::error!(slice = %record.slice, key = %record.key, error = %err, "could not stage update");
                    continue;
                }
                resolved.push(record);
            }

            let records = resolved.len();
            let slices = overlay.touched();
            let changes = self.commit(std::mem::take(&mut resolved));
            overlay.clear();
            let notified = dispatch::dispatch(&self.listeners, &changes);
            tracing::debug!(records, slices, pairs = changes.len(), notified, "batch committed");

            if self.finish_batch() {
                break;
            }
        }
    }

    /// Pop the oldest unit, moving to Committing when there is none.
    fn next_pending(&self) -> Option<PendingUpdate> {
        let mut queue = self.queue();
        let next = queue.pending.pop_front();
        if next.is_none() {
            self.set_phase(&mut queue, BatchPhase::Committing);
        }
        next
    }

    /// Back to Idle, or Draining again if units arrived while committing.
    fn finish_batch(&self) -> bool {
        let mut queue = self.queue();
        if queue.pending.is_empty() {
            self.set_phase(&mut queue, BatchPhase::Idle);
            true
        } else {
            self.set_phase(&mut queue, BatchPhase::Draining);
            false
        }
    }

    fn latest(&self, overlay: &Overlay, slice: &str, key: &str) -> Result<Arc<Value>, StoreError> {
        let state = self.state()?;
        overlay.latest(&state, slice, key)
    }

    fn stage(&self, overlay: &mut Overlay, record: &Resolved) -> Result<(), StoreError> {
        let state = self.state()?;
        overlay.write(&state, &record.slice, &record.key, Arc::clone(&record.value))
    }

    async fn resolve(&self, overlay: &Overlay, unit: PendingUpdate) -> Option<Resolved> {
        let PendingUpdate {
            slice,
            key,
            update,
            force,
        } = unit;

        let previous = match self.latest(overlay, &slice, &key) {
            Ok(previous) => previous,
            Err(err) => {
                tracing::warn!(%slice, %key, error = %err, "dropping update for unreadable key");
                return None;
            }
        };

        match AssertUnwindSafe(update.resolve(Value::clone(&previous)))
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => Some(Resolved {
                slice,
                key,
                value: Arc::new(value),
                force,
            }),
            Ok(Err(err)) => {
                tracing::warn!(%slice, %key, error = %err, "update failed, dropping it");
                None
            }
            Err(_) => {
                tracing::error!(%slice, %key, "update panicked, dropping it");
                None
            }
        }
    }

    /// Commit records in order and collapse them into one change per pair.
    fn commit(&self, records: Vec<Resolved>) -> Vec<Change> {
        let mut changes: Vec<Change> = Vec::new();
        let mut index: HashMap<(String, String), usize> = HashMap::new();

        for Resolved {
            slice,
            key,
            value,
            force,
        } in records
        {
            let value = self.apply_middleware(&slice, &key, value);
            let old = match self
                .state_mut()
                .and_then(|mut state| state.commit(&slice, &key, Arc::clone(&value)))
            {
                Ok(old) => old,
                Err(err) => {
                    tracing::error!(%slice, %key, error = %err, "commit failed");
                    continue;
                }
            };

            match index.entry((slice.clone(), key.clone())) {
                Entry::Occupied(entry) => {
                    let change = &mut changes[*entry.get()];
                    change.new = value;
                    change.force |= force;
                }
                Entry::Vacant(entry) => {
                    entry.insert(changes.len());
                    changes.push(Change {
                        slice,
                        key,
                        old,
                        new: value,
                        force,
                    });
                }
            }
        }
        changes
    }

    fn apply_middleware(&self, slice: &str, key: &str, value: Arc<Value>) -> Arc<Value> {
        let middleware = match self.middlewares.read() {
            Ok(middlewares) => middlewares.get(slice, key),
            Err(_) => {
                tracing::error!(slice, key, "middleware registry poisoned, skipping middleware");
                None
            }
        };
        let Some(middleware) = middleware else {
            return value;
        };
        // Middleware may call back into the store, so it sees a copy of the
        // committed state rather than holding the lock.
        let view = match self.state() {
            Ok(state) => state.clone(),
            Err(err) => {
                tracing::error!(slice, key, error = %err, "skipping middleware");
                return value;
            }
        };
        middleware.apply(slice, key, value, &StoreView::new(&view))
    }

    /// Write values straight into the committed state, bypassing the queue,
    /// middleware and listeners. Keys the slice does not have are skipped.
    pub fn hydrate(&self, slice: &str, values: Vec<(String, Value)>) -> Result<usize, StoreError> {
        let mut state = self.state_mut()?;
        state.keys(slice)?;
        let mut applied = 0;
        for (key, value) in values {
            if !state.contains(slice, &key) {
                tracing::debug!(slice, %key, "skipping unknown key during hydration");
                continue;
            }
            state.commit(slice, &key, Arc::new(value))?;
            applied += 1;
        }
        Ok(applied)
    }
}
