//! API route handlers.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use socksgate_core::{matcher, Whitelist};
use socksgate_proxy::{ProxyStatus, RawConfig};
use tracing::{debug, info};

use crate::error::{ApiError, Result};
use crate::models::{CheckQuery, CheckResponse, ToggleRequest};
use crate::state::AppState;

/// GET /api/state - Current proxy status.
pub async fn get_state(State(state): State<AppState>) -> Json<ProxyStatus> {
    Json(state.proxy.status())
}

/// POST /api/toggle - Turn the proxy on or off.
pub async fn toggle(
    State(state): State<AppState>,
    body: std::result::Result<Json<ToggleRequest>, JsonRejection>,
) -> Result<Json<ProxyStatus>> {
    let Json(req) = body?;
    info!(enabled = req.enabled, "Toggle requested over API");

    let status = state.proxy.toggle(req.enabled).await?;
    Ok(Json(status))
}

/// PUT /api/config - Replace the upstream proxy and whitelist.
pub async fn update_config(
    State(state): State<AppState>,
    body: std::result::Result<Json<RawConfig>, JsonRejection>,
) -> Result<Json<ProxyStatus>> {
    let Json(raw) = body?;
    debug!(
        host = %raw.host,
        whitelist = raw.whitelist.len(),
        "Config update requested over API"
    );

    let status = state.proxy.update_config(raw).await?;
    Ok(Json(status))
}

/// GET /api/check - Whether a URL would bypass the proxy.
pub async fn check_url(
    State(state): State<AppState>,
    query: std::result::Result<Query<CheckQuery>, QueryRejection>,
) -> Result<Json<CheckResponse>> {
    let Query(query) = query?;
    let status = state.proxy.status();

    let whitelist = Whitelist::parse(&status.whitelist)
        .map_err(|e| ApiError::Internal(format!("stored whitelist is invalid: {}", e)))?;
    let pattern = matcher::matching_pattern(&whitelist, &query.url).map(|p| p.as_str().to_string());

    Ok(Json(CheckResponse {
        url: query.url,
        bypass: pattern.is_some(),
        pattern,
    }))
}
