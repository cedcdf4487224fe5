//! Export and import of the persisted settings.
//!
//! The file holds the same layout the store persists (`proxyEnabled`,
//! `proxyConfig`, `whitelistDomains`) plus a format version.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use socksgate_core::PersistedState;
use socksgate_proxy::{PortInput, RawConfig};
use socksgate_storage::{Database, StorageError};
use thiserror::Error;

/// Format version written by [`export`].
pub const EXPORT_VERSION: u32 = 1;

/// Errors reading or writing settings files.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported settings file version {found} (expected at most {EXPORT_VERSION})")]
    UnsupportedVersion { found: u32 },
}

/// Result type for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;

#[derive(Debug, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(flatten)]
    state: PersistedState,
}

fn default_version() -> u32 {
    EXPORT_VERSION
}

/// Writes the persisted settings of `db` to `path`.
pub fn export(db: &Database, path: &Path) -> Result<PersistedState> {
    let state = db.load_state()?;
    let file = SettingsFile {
        version: EXPORT_VERSION,
        state,
    };

    fs::write(path, serde_json::to_string_pretty(&file)?)?;
    tracing::info!(path = %path.display(), "Exported settings");
    Ok(file.state)
}

/// Reads a settings file. Every field is validated while decoding.
pub fn read(path: &Path) -> Result<PersistedState> {
    let contents = fs::read_to_string(path)?;
    let file: SettingsFile = serde_json::from_str(&contents)?;
    if file.version > EXPORT_VERSION {
        return Err(TransferError::UnsupportedVersion {
            found: file.version,
        });
    }
    Ok(file.state)
}

/// The settings form input equivalent to `state`.
pub fn to_raw_config(state: &PersistedState) -> RawConfig {
    let credentials = state.target.credentials();
    RawConfig {
        host: state.target.host().to_string(),
        port: PortInput::from(state.target.port()),
        username: credentials.map(|c| c.username.clone()),
        password: credentials.map(|c| c.password.clone()),
        whitelist: state.whitelist.to_strings(),
    }
}
