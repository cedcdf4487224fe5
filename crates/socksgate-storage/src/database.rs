//! High-level database interface.

use std::path::PathBuf;

use directories::ProjectDirs;
use rusqlite::Connection;
use socksgate_core::{PersistedState, ProxyTarget, StateUpdate, Whitelist, WhitelistPattern};
use tracing::{info, warn};

use crate::error::{Result, StorageError};
use crate::models::ConfigEntry;
use crate::pool::ConnectionPool;
use crate::repository::ConfigRepo;

/// Key of the persisted `enabled` flag.
pub const KEY_ENABLED: &str = "proxyEnabled";
/// Key of the persisted proxy target.
pub const KEY_TARGET: &str = "proxyConfig";
/// Key of the persisted whitelist.
pub const KEY_WHITELIST: &str = "whitelistDomains";

/// Project directories for SocksGate.
pub fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "socksgate", "socksgate")
        .ok_or_else(|| StorageError::Config("Could not determine app data directory".into()))
}

/// High-level database interface for SocksGate.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Create a new database in the default app data directory.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_db_path()?)
    }

    /// Create a new database at a specific path.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening database at: {:?}", path);
        let pool = ConnectionPool::new(&path)?;

        Ok(Self { pool })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let pool = ConnectionPool::in_memory()?;
        Ok(Self { pool })
    }

    /// Get the default database path.
    pub fn default_db_path() -> Result<PathBuf> {
        Ok(project_dirs()?.data_dir().join("socksgate.db"))
    }

    // === Persisted state ===

    /// Reads the persisted state. Missing or undecodable keys fall back to
    /// their defaults.
    pub fn load_state(&self) -> Result<PersistedState> {
        let conn = self.pool.get()?;
        read_state(&conn)
    }

    /// Merges `update` into the stored state inside one transaction and
    /// returns the committed result. Only supplied keys are written.
    pub fn apply_update(&self, update: &StateUpdate) -> Result<PersistedState> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let current = read_state(&tx)?;
        let next = update.apply_to(&current);

        if let Some(enabled) = update.enabled {
            ConfigRepo::set(&tx, KEY_ENABLED, &serde_json::to_value(enabled)?)?;
        }
        if let Some(target) = &update.target {
            ConfigRepo::set(&tx, KEY_TARGET, &serde_json::to_value(target)?)?;
        }
        if let Some(whitelist) = &update.whitelist {
            ConfigRepo::set(&tx, KEY_WHITELIST, &serde_json::to_value(whitelist)?)?;
        }

        tx.commit()?;
        Ok(next)
    }

    /// Every raw config row, for diagnostics.
    pub fn config_entries(&self) -> Result<Vec<ConfigEntry>> {
        let conn = self.pool.get()?;
        ConfigRepo::get_all(&conn)
    }

    /// Rejects all writes while set.
    pub fn set_read_only(&self, read_only: bool) -> Result<()> {
        let conn = self.pool.get()?;
        conn.pragma_update(None, "query_only", read_only)?;
        Ok(())
    }
}

fn read_state(conn: &Connection) -> Result<PersistedState> {
    let enabled = ConfigRepo::get_or_default(conn, KEY_ENABLED, false)?;
    let target = ConfigRepo::get_or_default(conn, KEY_TARGET, ProxyTarget::default())?;
    let whitelist = read_whitelist(conn)?;

    Ok(PersistedState {
        enabled,
        target,
        whitelist,
    })
}

/// Reads the whitelist entry by entry so one bad pattern does not discard
/// the rest.
fn read_whitelist(conn: &Connection) -> Result<Whitelist> {
    let raw: Vec<String> = ConfigRepo::get_or_default(conn, KEY_WHITELIST, Vec::new())?;

    Ok(raw
        .iter()
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| match WhitelistPattern::parse(entry) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!(entry = %entry, error = %e, "Dropping invalid stored whitelist entry");
                None
            }
        })
        .collect())
}
