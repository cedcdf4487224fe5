//! Shared SQLite connection.
//!
//! SocksGate writes a handful of keys on user action, so a single
//! Mutex-protected connection is enough.

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::{Result, StorageError};
use crate::schema::run_migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Cloneable handle to the migrated connection.
#[derive(Clone)]
pub struct ConnectionPool {
    conn: Arc<Mutex<Connection>>,
}

impl ConnectionPool {
    /// Opens (or creates) a database file.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::prepare(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(mut conn: Connection) -> Result<Self> {
        // Committed settings must survive a crash.
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        run_migrations(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Locks the connection for the caller.
    pub fn get(&self) -> Result<PooledConnection<'_>> {
        self.conn
            .lock()
            .map(|guard| PooledConnection { guard })
            .map_err(|_| StorageError::Unavailable("database connection poisoned".to_string()))
    }
}

/// A locked connection; unlocks on drop.
pub struct PooledConnection<'a> {
    guard: MutexGuard<'a, Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.guard
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.guard
    }
}
