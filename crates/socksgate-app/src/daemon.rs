//! The long-running daemon: store, host backend, proxy service and API.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use socksgate_core::{default_sink, AlertSink, LogAlertSink, SharedIndicator};
use socksgate_proxy::{
    HostProxyService, MemoryProxyService, ProxyService, ServiceConfig, SystemProxyService,
};
use socksgate_server::{AppState, Server, ServerConfig};
use socksgate_storage::{ConfigStore, Database};
use tracing::{info, warn};

/// How the daemon is started.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    /// Database file; the platform data directory when `None`.
    pub db_path: Option<PathBuf>,
    /// Use the in-memory host backend instead of the OS proxy settings.
    pub dry_run: bool,
    pub service: ServiceConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            db_path: None,
            dry_run: false,
            service: ServiceConfig::default(),
        }
    }
}

impl DaemonConfig {
    fn open_database(&self) -> anyhow::Result<Database> {
        let db = match &self.db_path {
            Some(path) => Database::with_path(path),
            None => Database::new(),
        };
        db.context("Could not open the settings database")
    }

    fn host_backend(&self) -> Arc<dyn HostProxyService> {
        if self.dry_run {
            info!("Dry run: proxy settings stay in memory");
            Arc::new(MemoryProxyService::new())
        } else {
            Arc::new(SystemProxyService::new())
        }
    }
}

/// Runs until Ctrl-C.
pub async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    run_until(config, shutdown_signal()).await
}

/// Runs until `shutdown` resolves. The host proxy settings are left as they
/// are so the next start restores the same mode.
pub async fn run_until<F>(config: DaemonConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let db = config.open_database()?;
    if let Some(path) = &config.db_path {
        info!("Database opened at {:?}", path);
    } else if let Ok(path) = Database::default_db_path() {
        info!("Database opened at {:?}", path);
    }

    let store = ConfigStore::new(db).context("Could not load persisted settings")?;
    let sink: Arc<dyn AlertSink> = if config.dry_run {
        Arc::new(LogAlertSink)
    } else {
        default_sink()
    };

    let (handle, task) = ProxyService::spawn(
        config.host_backend(),
        store,
        Arc::new(SharedIndicator::new()),
        sink,
        config.service.clone(),
    );

    let server = Server::with_state(config.server.clone(), AppState::new(handle))?;
    let served = server.run_until(shutdown).await;

    // The router held the last handle; the actor drains its queue and stops.
    match tokio::time::timeout(Duration::from_secs(5), task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Proxy service ended abnormally"),
        Err(_) => warn!("Proxy service did not stop in time"),
    }

    served.context("API server failed")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            warn!(error = %e, "Could not listen for Ctrl-C; running until killed");
            std::future::pending::<()>().await;
        }
    }
}
