//! Application state for the API server.

use socksgate_proxy::ProxyHandle;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the proxy service actor.
    pub proxy: ProxyHandle,
}

impl AppState {
    pub fn new(proxy: ProxyHandle) -> Self {
        Self { proxy }
    }
}
