//! Async config store.
//!
//! `ConfigStore` is the only way persisted state changes. It serializes
//! updates, runs SQLite work off the async runtime, and publishes every
//! committed state on a `watch` channel.

use std::sync::Arc;

use socksgate_core::{PersistedState, StateUpdate};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::database::Database;
use crate::error::{Result, StorageError};

struct Inner {
    db: Database,
    write_lock: Mutex<()>,
    changes: watch::Sender<PersistedState>,
}

/// Shared handle to persisted configuration.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<Inner>,
}

impl ConfigStore {
    /// Wraps a database, loading its current state for the change feed.
    pub fn new(db: Database) -> Result<Self> {
        let initial = db.load_state()?;
        let (changes, _) = watch::channel(initial);

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                write_lock: Mutex::new(()),
                changes,
            }),
        })
    }

    /// In-memory store (for testing and dry runs).
    pub fn in_memory() -> Result<Self> {
        Self::new(Database::in_memory()?)
    }

    /// The underlying database.
    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    /// Reads the persisted state.
    pub async fn get(&self) -> Result<PersistedState> {
        let db = self.inner.db.clone();
        run_blocking(move || db.load_state()).await
    }

    /// Merges `update` into the persisted state. All-or-nothing; once this
    /// resolves, later reads observe the new value.
    pub async fn update(&self, update: StateUpdate) -> Result<PersistedState> {
        if update.is_empty() {
            return self.get().await;
        }

        let _guard = self.inner.write_lock.lock().await;

        let db = self.inner.db.clone();
        let update_for_db = update.clone();
        let state = run_blocking(move || db.apply_update(&update_for_db)).await?;

        debug!(?update, "Config store updated");
        self.inner.changes.send_replace(state.clone());
        Ok(state)
    }

    /// Subscribes to committed states.
    pub fn subscribe(&self) -> watch::Receiver<PersistedState> {
        self.inner.changes.subscribe()
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Unavailable(format!("storage worker failed: {}", e)))?
}
