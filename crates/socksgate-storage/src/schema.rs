//! Schema versioning.
//!
//! Migrations are plain SQL steps keyed by the version they produce. Each
//! step runs in its own transaction together with the version bump.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{Result, StorageError};

/// Latest schema version this build understands.
pub const SCHEMA_VERSION: i32 = 1;

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "config table",
    sql: "CREATE TABLE IF NOT EXISTS config (
              key        TEXT PRIMARY KEY,
              value      TEXT NOT NULL,
              updated_at TEXT NOT NULL
          );",
}];

/// Brings the database up to [`SCHEMA_VERSION`]. A database written by a
/// newer build is refused rather than touched.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let found = stored_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(StorageError::Migration(format!(
            "schema version {} was written by a newer SocksGate (this build knows {})",
            found, SCHEMA_VERSION
        )));
    }

    for step in MIGRATIONS.iter().filter(|m| m.version > found) {
        info!(version = step.version, name = step.name, "Applying migration");
        let tx = conn.transaction()?;
        tx.execute_batch(step.sql)?;
        write_version(&tx, step.version)?;
        tx.commit()?;
    }

    Ok(())
}

fn stored_version(conn: &Connection) -> Result<i32> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;
    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

fn write_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}
