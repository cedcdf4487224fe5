//! SocksGate Server - local HTTP API.
//!
//! Out-of-process UI surfaces (the CLI, a settings page) reach the proxy
//! service through this API.
//!
//! ## Endpoints
//!
//! - `GET /api/state` - Current proxy status
//! - `POST /api/toggle` - Turn the proxy on or off
//! - `PUT /api/config` - Replace the upstream proxy and whitelist
//! - `GET /api/check?url=` - Whether a URL would bypass the proxy
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use socksgate_core::{LogAlertSink, SharedIndicator};
//! use socksgate_proxy::{MemoryProxyService, ProxyService, ServiceConfig};
//! use socksgate_server::{AppState, Server, ServerConfig};
//! use socksgate_storage::ConfigStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (handle, _task) = ProxyService::spawn(
//!         Arc::new(MemoryProxyService::new()),
//!         ConfigStore::in_memory().unwrap(),
//!         Arc::new(SharedIndicator::new()),
//!         Arc::new(LogAlertSink),
//!         ServiceConfig::default(),
//!     );
//!     let server = Server::with_state(ServerConfig::default(), AppState::new(handle)).unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod error;
mod handlers;
pub mod models;
pub mod state;

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::{get, post, put};
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use error::{ApiError, ErrorResponse, Result};
pub use models::{CheckQuery, CheckResponse, ToggleRequest};
pub use state::AppState;

/// Default server port.
pub const DEFAULT_PORT: u16 = 48766;

/// Default server host (localhost only).
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1).
    pub host: String,
    /// Port to bind to (default: 48766).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Base URL clients use to reach this server.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),

    /// Invalid host or port.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),
}

/// Builds the API router over `state`.
pub fn router(state: AppState) -> Router {
    // UI surfaces may live on another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/state", get(handlers::get_state))
        .route("/api/toggle", post(handlers::toggle))
        .route("/api/config", put(handlers::update_config))
        .route("/api/check", get(handlers::check_url))
        .layer(cors)
        .with_state(state)
}

/// The HTTP API server.
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    /// Creates a server over an existing proxy service handle.
    pub fn with_state(
        config: ServerConfig,
        state: AppState,
    ) -> std::result::Result<Self, ServerError> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ServerError::InvalidAddress(format!("{}:{}: {}", config.host, config.port, e)))?;

        Ok(Self {
            router: router(state),
            addr,
        })
    }

    /// Returns the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs the server until the process exits.
    pub async fn run(self) -> std::result::Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the server until `shutdown` resolves, then drains open
    /// connections.
    pub async fn run_until<F>(self, shutdown: F) -> std::result::Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind()?;
        info!("SocksGate API listening on {}", self.addr);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        info!("SocksGate API stopped");
        Ok(())
    }

    /// Binds with SO_REUSEADDR so a restart is not blocked by sockets left
    /// in TIME_WAIT.
    fn bind(&self) -> std::result::Result<tokio::net::TcpListener, ServerError> {
        let bind_err = |e| ServerError::BindError(self.addr, e);

        let domain = if self.addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.bind(&self.addr.into()).map_err(bind_err)?;
        socket.listen(128).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;

        let std_listener: std::net::TcpListener = socket.into();
        tokio::net::TcpListener::from_std(std_listener).map_err(bind_err)
    }

    /// Returns the router for testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use socksgate_core::{LogAlertSink, SharedIndicator};
    use socksgate_proxy::{MemoryProxyService, ProxyService, ServiceConfig};
    use socksgate_storage::ConfigStore;
    use tokio_test::assert_ok;
    use tower::ServiceExt;

    fn create_test_app() -> (Router, MemoryProxyService) {
        let host = MemoryProxyService::new();
        let (handle, _task) = ProxyService::spawn(
            Arc::new(host.clone()),
            ConfigStore::in_memory().unwrap(),
            Arc::new(SharedIndicator::new()),
            Arc::new(LogAlertSink),
            ServiceConfig::default(),
        );
        (router(AppState::new(handle)), host)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = assert_ok!(app.clone().oneshot(request).await);
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    // ==================== Config Tests ====================

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 48766);
        assert_eq!(config.with_port(9000).base_url(), "http://127.0.0.1:9000");
    }

    #[tokio::test]
    async fn invalid_host_is_rejected() {
        let (handle, _task) = ProxyService::spawn(
            Arc::new(MemoryProxyService::new()),
            ConfigStore::in_memory().unwrap(),
            Arc::new(SharedIndicator::new()),
            Arc::new(LogAlertSink),
            ServiceConfig::default(),
        );
        let config = ServerConfig::default().with_host("not an address");
        assert!(matches!(
            Server::with_state(config, AppState::new(handle)),
            Err(ServerError::InvalidAddress(_))
        ));
    }

    // ==================== Route Tests ====================

    #[tokio::test]
    async fn test_get_state() {
        let (app, _) = create_test_app();

        let (status, json) = send(&app, get_request("/api/state")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["mode"], "direct");
        assert_eq!(json["enabled"], false);
        assert_eq!(json["indicator"], "off");
    }

    #[tokio::test]
    async fn test_toggle_on_and_off() {
        let (app, host) = create_test_app();

        let (status, json) = send(
            &app,
            json_request("POST", "/api/toggle", json!({"enabled": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["mode"], "proxied");
        assert_eq!(json["indicator"], "on");
        assert!(host.current().target().is_some());

        let (status, json) = send(
            &app,
            json_request("POST", "/api/toggle", json!({"enabled": false})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["mode"], "direct");
    }

    #[tokio::test]
    async fn test_toggle_host_failure_is_502() {
        let (app, host) = create_test_app();
        host.fail_proxied_applies(Some("refused".into()));

        let (status, json) = send(
            &app,
            json_request("POST", "/api/toggle", json!({"enabled": true})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["code"], "host_service_error");
    }

    #[tokio::test]
    async fn test_update_config() {
        let (app, _) = create_test_app();

        let (status, json) = send(
            &app,
            json_request(
                "PUT",
                "/api/config",
                json!({"host": "10.0.0.2", "port": "9050", "whitelist": ["*.corp.net"]}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["target"]["host"], "10.0.0.2");
        assert_eq!(json["target"]["port"], 9050);
        assert_eq!(json["whitelist"], json!(["*.corp.net"]));
    }

    #[tokio::test]
    async fn test_update_config_rejects_bad_port() {
        let (app, _) = create_test_app();

        let (status, json) = send(
            &app,
            json_request(
                "PUT",
                "/api/config",
                json!({"host": "10.0.0.2", "port": 70000, "whitelist": []}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "invalid_config");
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (app, _) = create_test_app();

        let (status, json) = send(
            &app,
            json_request("PUT", "/api/config", json!({"port": 1080})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_check_url() {
        let (app, _) = create_test_app();
        send(
            &app,
            json_request(
                "PUT",
                "/api/config",
                json!({"host": "10.0.0.1", "port": 1080, "whitelist": ["*.example.com"]}),
            ),
        )
        .await;

        let (status, json) = send(
            &app,
            get_request("/api/check?url=https%3A%2F%2Fapi.example.com%2Fv1"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["bypass"], true);
        assert_eq!(json["pattern"], "*.example.com");

        let (_, json) = send(&app, get_request("/api/check?url=https%3A%2F%2Fother.org")).await;
        assert_eq!(json["bypass"], false);
        assert!(json.get("pattern").is_none());
    }

    #[tokio::test]
    async fn test_check_requires_url() {
        let (app, _) = create_test_app();

        let (status, json) = send(&app, get_request("/api/check")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "bad_request");
    }
}
