//! Row types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the `config` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Configuration key.
    pub key: String,
    /// Configuration value (JSON).
    pub value: serde_json::Value,
    /// When the value was last written.
    pub updated_at: DateTime<Utc>,
}
