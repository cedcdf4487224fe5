//! API request and response models.

use serde::{Deserialize, Serialize};

/// Request body for POST /api/toggle.
#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleRequest {
    /// Whether the proxy should be on.
    pub enabled: bool,
}

/// Query parameters for GET /api/check.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckQuery {
    /// URL whose host is checked against the whitelist.
    pub url: String,
}

/// Response body for GET /api/check.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub url: String,
    /// True when the URL would go direct.
    pub bypass: bool,
    /// Whitelist entry that matched, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}
