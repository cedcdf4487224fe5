//! Configuration repository.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::models::ConfigEntry;

/// Repository for the `config` key-value table.
pub struct ConfigRepo;

impl ConfigRepo {
    fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<ConfigEntry> {
        let value_str: String = row.get(1)?;
        let updated_str: String = row.get(2)?;
        Ok(ConfigEntry {
            key: row.get(0)?,
            // Unreadable JSON surfaces as Null; callers fall back to defaults.
            value: serde_json::from_str(&value_str).unwrap_or(serde_json::Value::Null),
            updated_at: DateTime::parse_from_rfc3339(&updated_str)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_default(),
        })
    }

    /// Get a configuration value.
    pub fn get(conn: &Connection, key: &str) -> Result<Option<ConfigEntry>> {
        let entry = conn
            .query_row(
                "SELECT key, value, updated_at FROM config WHERE key = ?1",
                [key],
                Self::entry_from_row,
            )
            .optional()?;

        Ok(entry)
    }

    /// Set a configuration value (insert or update).
    pub fn set(conn: &Connection, key: &str, value: &serde_json::Value) -> Result<()> {
        let value_json = serde_json::to_string(value)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value_json, now],
        )?;

        Ok(())
    }

    /// Delete a configuration value.
    pub fn delete(conn: &Connection, key: &str) -> Result<bool> {
        let deleted = conn.execute("DELETE FROM config WHERE key = ?1", [key])?;
        Ok(deleted > 0)
    }

    /// Get all configuration values.
    pub fn get_all(conn: &Connection) -> Result<Vec<ConfigEntry>> {
        let mut stmt = conn.prepare("SELECT key, value, updated_at FROM config ORDER BY key")?;

        let entries = stmt
            .query_map([], Self::entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    /// Get a typed configuration value, or `default` when the key is missing
    /// or its value does not decode.
    pub fn get_or_default<T: serde::de::DeserializeOwned>(
        conn: &Connection,
        key: &str,
        default: T,
    ) -> Result<T> {
        let Some(entry) = Self::get(conn, key)? else {
            return Ok(default);
        };

        match serde_json::from_value(entry.value) {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Stored config value is invalid, using default");
                Ok(default)
            }
        }
    }
}
