use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use ulid::Ulid;

use super::keys::{KeyRegistry, StorageInfo};
use super::storage::Storage;
use super::{PersistConfig, PersistError};
use crate::listener::{Listener, ListenerArgs, Subscription};
use crate::store::{Store, WeakStore};
use crate::value::codec;

/// Prefix of the subscriber ids persistence registers. Each attach adds a
/// unique suffix.
pub const SUBSCRIBER_ID: &str = "__persistence";

enum WriteOp {
    Set { key: String, text: String },
    Flush(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

/// Keeps the configured slices of a store mirrored in storage.
///
/// Attaching hydrates the slices from storage, then every committed change
/// to them is written by a background task in commit order. Dropping the
/// handle unsubscribes; writes already queued still complete.
pub struct Persistence {
    store: WeakStore,
    config: PersistConfig,
    registry: Arc<KeyRegistry>,
    writer: mpsc::UnboundedSender<WriteOp>,
    subscriptions: Vec<Subscription>,
}

impl Persistence {
    pub async fn attach<S>(
        store: &Store,
        storage: S,
        config: PersistConfig,
    ) -> Result<Self, PersistError>
    where
        S: Storage + 'static,
    {
        let storage: Arc<dyn Storage> = Arc::new(storage);

        for slice in &config.slices {
            store.keys(slice)?;
        }
        for slice in &config.slices {
            hydrate(store, storage.as_ref(), &config, slice).await?;
        }

        let registry = Arc::new(KeyRegistry::new(
            Arc::clone(&storage),
            config.registry_key(),
        ));
        let (writer, queue) = mpsc::unbounded_channel();
        store
            .engine()
            .runtime()
            .spawn(write_loop(storage, Arc::clone(&registry), queue));

        let subscriber = format!("{}:{}", SUBSCRIBER_ID, Ulid::new());
        let mut subscriptions = Vec::new();
        for slice in &config.slices {
            let listener = persist_listener(
                store.downgrade(),
                config.clone(),
                writer.clone(),
                &subscriber,
            );
            subscriptions.extend(store.subscribe_slice(slice, listener)?);
        }
        tracing::debug!(slices = ?config.slices, prefix = %config.prefix, "persistence attached");

        Ok(Persistence {
            store: store.downgrade(),
            config,
            registry,
            writer,
            subscriptions,
        })
    }

    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    /// Wait until every write queued so far has reached storage.
    pub async fn flush(&self) -> Result<(), PersistError> {
        let (done, wait) = oneshot::channel();
        self.writer
            .send(WriteOp::Flush(done))
            .map_err(|_| PersistError::Detached)?;
        wait.await.map_err(|_| PersistError::Detached)
    }

    /// Stop persisting. Writes queued before the call are completed first.
    pub async fn detach(mut self) -> Result<(), PersistError> {
        self.unsubscribe_all();
        let (done, wait) = oneshot::channel();
        self.writer
            .send(WriteOp::Stop(done))
            .map_err(|_| PersistError::Detached)?;
        wait.await.map_err(|_| PersistError::Detached)?;
        tracing::debug!("persistence detached");
        Ok(())
    }

    /// Storage keys for every key of the persisted slices.
    pub fn active_keys(&self) -> Vec<String> {
        let Some(store) = self.store.upgrade() else {
            return Vec::new();
        };
        self.config
            .slices
            .iter()
            .flat_map(|slice| {
                store
                    .keys(slice)
                    .unwrap_or_default()
                    .into_iter()
                    .map(move |key| self.config.storage_key(slice, &key))
            })
            .collect()
    }

    pub async fn stored_keys(&self) -> Result<Vec<String>, PersistError> {
        Ok(self.registry.stored_keys().await?)
    }

    pub async fn info(&self) -> Result<StorageInfo, PersistError> {
        self.flush().await?;
        Ok(self.registry.info().await?)
    }

    /// Remove a slice's stored values. The store itself is left untouched.
    pub async fn clear_slice(&self, slice: &str) -> Result<Vec<String>, PersistError> {
        self.flush().await?;
        let extra = match self.store.upgrade() {
            Some(store) => store
                .keys(slice)?
                .into_iter()
                .map(|key| self.config.storage_key(slice, &key))
                .collect(),
            None => Vec::new(),
        };
        let prefix = self.config.storage_key(slice, "");
        let removed = self
            .registry
            .remove_matching(extra, move |key| key.starts_with(&prefix))
            .await?;
        tracing::debug!(slice, count = removed.len(), "cleared slice from storage");
        Ok(removed)
    }

    /// Remove every stored value this store ever wrote, and the registry.
    pub async fn clear_all(&self) -> Result<usize, PersistError> {
        self.flush().await?;
        Ok(self.registry.clear_all().await?)
    }

    /// Remove registered keys that are not in `active`.
    pub async fn cleanup_unused(&self, active: &[String]) -> Result<Vec<String>, PersistError> {
        self.flush().await?;
        let active = active.to_vec();
        let removed = self
            .registry
            .remove_matching(Vec::new(), move |key| !active.iter().any(|a| a == key))
            .await?;
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "removed unused storage keys");
        }
        Ok(removed)
    }

    fn unsubscribe_all(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
    }
}

impl Drop for Persistence {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("config", &self.config)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

/// Load stored values for a slice into committed state. Listeners and
/// middleware are not involved.
async fn hydrate(
    store: &Store,
    storage: &dyn Storage,
    config: &PersistConfig,
    slice: &str,
) -> Result<usize, PersistError> {
    let mut values = Vec::new();
    for key in store.keys(slice)? {
        let storage_key = config.storage_key(slice, &key);
        let text = match storage.get_item(&storage_key).await {
            Ok(Some(text)) => text,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(key = %storage_key, error = %err, "could not read stored value");
                continue;
            }
        };
        match codec::from_text(&text) {
            Ok(value) => values.push((key, value)),
            Err(err) => {
                tracing::warn!(key = %storage_key, error = %err, "skipping unreadable stored value");
            }
        }
    }

    let applied = store.engine().hydrate(slice, values)?;
    tracing::debug!(slice, applied, "slice hydrated");
    Ok(applied)
}

fn persist_listener(
    store: WeakStore,
    config: PersistConfig,
    writer: mpsc::UnboundedSender<WriteOp>,
    subscriber: &str,
) -> Listener {
    Listener::new(move |args: &ListenerArgs| {
        let Some(store) = store.upgrade() else {
            return;
        };
        let text = match store
            .get(&args.slice, &args.key)
            .map_err(|err| err.to_string())
            .and_then(|value| codec::to_text(&value).map_err(|err| err.to_string()))
        {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(slice = %args.slice, key = %args.key, error = %err, "could not serialize value");
                return;
            }
        };
        let op = WriteOp::Set {
            key: config.storage_key(&args.slice, &args.key),
            text,
        };
        if writer.send(op).is_err() {
            tracing::debug!(slice = %args.slice, key = %args.key, "persistence writer stopped, dropping write");
        }
    })
    .id(subscriber)
}

async fn write_loop(
    storage: Arc<dyn Storage>,
    registry: Arc<KeyRegistry>,
    mut queue: mpsc::UnboundedReceiver<WriteOp>,
) {
    while let Some(op) = queue.recv().await {
        match op {
            WriteOp::Set { key, text } => {
                if let Err(err) = storage.set_item(&key, &text).await {
                    tracing::warn!(key = %key, error = %err, "storage write failed");
                    continue;
                }
                if let Err(err) = registry.add(&key).await {
                    tracing::warn!(key = %key, error = %err, "could not register storage key");
                }
            }
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
            WriteOp::Stop(done) => {
                let _ = done.send(());
                break;
            }
        }
    }
    tracing::debug!("persistence writer stopped");
}
