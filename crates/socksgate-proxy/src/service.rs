//! Proxy service actor.
//!
//! One task owns the [`ProxyController`] and processes commands strictly one
//! at a time. UI surfaces talk to it through a cloneable [`ProxyHandle`] and
//! observe it through a read-only [`ProxyStatus`] feed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use socksgate_core::{
    bypass, Alert, AlertSink, ConfigError, Indicator, IndicatorStatus, Notifier, PersistedState,
    ProxyMode, ProxyTarget, StateUpdate, Whitelist, NOTIFICATION_COOLDOWN,
};
use socksgate_storage::ConfigStore;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::controller::{ProxyController, DEFAULT_HOST_TIMEOUT};
use crate::error::{ErrorKind, ProxyError, Result};
use crate::host::{HostEvent, HostProxyService};
use crate::probe::spawn_health_probe;

// ============================================================================
// Configuration
// ============================================================================

/// Runtime settings for the proxy service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Bound on each host proxy call.
    pub host_timeout: Duration,
    /// Minimum time between notifications.
    pub notification_cooldown: Duration,
    /// Whether desktop notifications are shown.
    pub notifications_enabled: bool,
    /// Pending command capacity.
    pub queue_capacity: usize,
    /// Upstream reachability check interval; `None` disables it.
    pub health_check_interval: Option<Duration>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host_timeout: DEFAULT_HOST_TIMEOUT,
            notification_cooldown: NOTIFICATION_COOLDOWN,
            notifications_enabled: true,
            queue_capacity: 32,
            health_check_interval: None,
        }
    }
}

impl ServiceConfig {
    pub fn with_host_timeout(mut self, timeout: Duration) -> Self {
        self.host_timeout = timeout;
        self
    }

    pub fn with_notification_cooldown(mut self, cooldown: Duration) -> Self {
        self.notification_cooldown = cooldown;
        self
    }

    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications_enabled = enabled;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_health_check(mut self, interval: Option<Duration>) -> Self {
        self.health_check_interval = interval;
        self
    }
}

// ============================================================================
// Status projection
// ============================================================================

/// Upstream proxy as shown to UIs. The password is never exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl From<&ProxyTarget> for TargetSummary {
    fn from(target: &ProxyTarget) -> Self {
        Self {
            scheme: target.scheme().to_string(),
            host: target.host().to_string(),
            port: target.port(),
            endpoint: target.endpoint(),
            username: target.credentials().map(|c| c.username.clone()),
        }
    }
}

/// Most recent failure, kept until the next successful operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ProxyError> for ErrorSummary {
    fn from(e: &ProxyError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Read-only view of the proxy state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyStatus {
    /// Mode actually in effect.
    pub mode: ProxyMode,
    /// Persisted user request.
    pub enabled: bool,
    pub target: TargetSummary,
    pub whitelist: Vec<String>,
    /// Bypass rules derived from the whitelist.
    pub bypass: Vec<String>,
    pub indicator: IndicatorStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorSummary>,
    pub updated_at: DateTime<Utc>,
}

impl ProxyStatus {
    fn new(
        mode: ProxyMode,
        state: &PersistedState,
        indicator: IndicatorStatus,
        last_error: Option<ErrorSummary>,
    ) -> Self {
        Self {
            mode,
            enabled: state.enabled,
            target: TargetSummary::from(&state.target),
            whitelist: state.whitelist.to_strings(),
            bypass: bypass::build(&state.whitelist).tokens(),
            indicator,
            last_error,
            updated_at: Utc::now(),
        }
    }
}

// ============================================================================
// Raw input
// ============================================================================

/// Port as typed: a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortInput {
    Number(i64),
    Text(String),
}

impl PortInput {
    pub fn parse(&self) -> std::result::Result<u16, ConfigError> {
        match self {
            Self::Number(n) => u16::try_from(*n)
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| ConfigError::InvalidPort(n.to_string())),
            Self::Text(s) => ProxyTarget::parse_port(s),
        }
    }
}

impl From<u16> for PortInput {
    fn from(port: u16) -> Self {
        Self::Number(port.into())
    }
}

/// Unvalidated settings as submitted by a settings form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawConfig {
    pub host: String,
    pub port: PortInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub whitelist: Vec<String>,
}

impl RawConfig {
    /// Validates every field. Nothing partial is ever returned.
    pub fn validate(&self) -> std::result::Result<(ProxyTarget, Whitelist), ConfigError> {
        let port = self.port.parse()?;
        let target = ProxyTarget::new(&self.host, port)?
            .with_credentials(self.username.clone(), self.password.clone());
        let whitelist = Whitelist::parse(&self.whitelist)?;
        Ok((target, whitelist))
    }
}

// ============================================================================
// Handle
// ============================================================================

enum Command {
    Toggle {
        enabled: bool,
        reply: oneshot::Sender<Result<ProxyStatus>>,
    },
    UpdateConfig {
        target: ProxyTarget,
        whitelist: Whitelist,
        reply: oneshot::Sender<Result<ProxyStatus>>,
    },
    Sync {
        reply: oneshot::Sender<ProxyStatus>,
    },
}

/// Client side of the proxy service.
#[derive(Clone)]
pub struct ProxyHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ProxyStatus>,
    notifier: Notifier,
}

impl ProxyHandle {
    /// Turns the proxy on or off. Resolves once the transition has
    /// completed or failed.
    pub async fn toggle(&self, enabled: bool) -> Result<ProxyStatus> {
        self.request(|reply| Command::Toggle { enabled, reply })
            .await?
    }

    /// Validates and applies new settings. Invalid input is rejected here
    /// without reaching the service.
    pub async fn update_config(&self, raw: RawConfig) -> Result<ProxyStatus> {
        let (target, whitelist) = raw.validate()?;
        self.apply_config(target, whitelist).await
    }

    /// Applies already-validated settings.
    pub async fn apply_config(&self, target: ProxyTarget, whitelist: Whitelist) -> Result<ProxyStatus> {
        self.request(|reply| Command::UpdateConfig {
            target,
            whitelist,
            reply,
        })
        .await?
    }

    /// Waits for every earlier command to finish and returns the status.
    pub async fn sync(&self) -> Result<ProxyStatus> {
        self.request(|reply| Command::Sync { reply }).await
    }

    /// Latest published status.
    pub fn status(&self) -> ProxyStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProxyStatus> {
        self.status.clone()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| ProxyError::ServiceUnavailable)?;
        response.await.map_err(|_| ProxyError::ServiceUnavailable)
    }
}

// ============================================================================
// Actor
// ============================================================================

/// Owns the controller and serializes every state change.
pub struct ProxyService {
    controller: ProxyController,
    store: ConfigStore,
    notifier: Notifier,
    state: PersistedState,
    last_error: Option<ErrorSummary>,
    status: watch::Sender<ProxyStatus>,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Receiver<HostEvent>,
}

impl ProxyService {
    /// Starts the service. The cold start runs first; commands sent
    /// meanwhile wait in the queue.
    pub fn spawn(
        host: Arc<dyn HostProxyService>,
        store: ConfigStore,
        indicator: Arc<dyn Indicator>,
        sink: Arc<dyn AlertSink>,
        config: ServiceConfig,
    ) -> (ProxyHandle, JoinHandle<()>) {
        let notifier = Notifier::with_cooldown(sink, config.notification_cooldown);
        notifier.set_enabled(config.notifications_enabled);

        let state = store.subscribe().borrow().clone();
        let (status_tx, status_rx) = watch::channel(ProxyStatus::new(
            ProxyMode::Direct,
            &state,
            indicator.current(),
            None,
        ));
        let (commands_tx, commands_rx) = mpsc::channel(config.queue_capacity.max(1));

        info!(host = host.name(), "Starting proxy service");
        let events = host.events();
        if let Some(interval) = config.health_check_interval {
            spawn_health_probe(status_rx.clone(), Arc::clone(&host), interval);
        }
        let controller =
            ProxyController::new(host, store.clone(), indicator).with_host_timeout(config.host_timeout);

        let service = Self {
            controller,
            store,
            notifier: notifier.clone(),
            state,
            last_error: None,
            status: status_tx,
            commands: commands_rx,
            events,
        };

        let task = tokio::spawn(service.run());
        let handle = ProxyHandle {
            commands: commands_tx,
            status: status_rx,
            notifier,
        };
        (handle, task)
    }

    async fn run(mut self) {
        self.cold_start().await;

        let mut events_open = true;
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                event = self.events.recv(), if events_open => match event {
                    Ok(event) => self.on_host_event(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Dropped host proxy events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Host event stream closed");
                        events_open = false;
                    }
                },
            }
        }

        info!("Proxy service stopped");
    }

    async fn cold_start(&mut self) {
        let result = self.controller.cold_start().await.map(|state| {
            self.state = state;
        });
        if let Err(e) = &result {
            error!(error = %e, "Cold start could not restore the proxy");
        }
        let _ = self.finish(result);
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Toggle { enabled, reply } => {
                let result = self.toggle(enabled).await;
                let _ = reply.send(self.finish(result));
            }
            Command::UpdateConfig {
                target,
                whitelist,
                reply,
            } => {
                let result = self.update_config(target, whitelist).await;
                let _ = reply.send(self.finish(result));
            }
            Command::Sync { reply } => {
                let _ = reply.send(self.status.borrow().clone());
            }
        }
    }

    async fn toggle(&mut self, enabled: bool) -> Result<()> {
        let mode = ProxyMode::from_enabled(enabled);
        self.state = self.controller.set_mode(mode, &self.state).await?;
        Ok(())
    }

    async fn update_config(&mut self, target: ProxyTarget, whitelist: Whitelist) -> Result<()> {
        // Persist first so the settings survive a failed re-apply.
        self.state = self
            .store
            .update(StateUpdate::config(target, whitelist))
            .await?;
        info!(proxy = %self.state.target, whitelist = self.state.whitelist.len(), "Proxy settings updated");

        if self.controller.mode().is_proxied() {
            self.state = self
                .controller
                .set_mode(ProxyMode::Proxied, &self.state)
                .await?;
        }
        Ok(())
    }

    fn on_host_event(&mut self, event: HostEvent) {
        let error = match event {
            HostEvent::ProxyError { error, fatal } => {
                warn!(%error, fatal, "Host proxy error");
                self.notifier.notify(&Alert::proxy_error(&error));
                ProxyError::ConnectionFailure(error)
            }
            HostEvent::ConnectionFailed { detail } => {
                warn!(%detail, "Proxy connection failed");
                self.notifier.notify(&Alert::connection_failed());
                ProxyError::ConnectionFailure(detail)
            }
        };
        self.last_error = Some(ErrorSummary::from(&error));
        self.publish();
    }

    /// Records the outcome, alerts on failure and publishes the new status.
    fn finish(&mut self, result: Result<()>) -> Result<ProxyStatus> {
        match result {
            Ok(()) => {
                self.last_error = None;
                Ok(self.publish())
            }
            Err(e) => {
                warn!(kind = %e.kind(), error = %e, "Proxy operation failed");
                if let Some(alert) = alert_for(&e) {
                    self.notifier.notify(&alert);
                }
                self.last_error = Some(ErrorSummary::from(&e));
                self.publish();
                Err(e)
            }
        }
    }

    fn publish(&self) -> ProxyStatus {
        let status = ProxyStatus::new(
            self.controller.mode(),
            &self.state,
            self.controller.indicator(),
            self.last_error.clone(),
        );
        self.status.send_replace(status.clone());
        status
    }
}

/// The alert shown for a failed operation, if any.
fn alert_for(error: &ProxyError) -> Option<Alert> {
    match error.kind() {
        ErrorKind::HostServiceError | ErrorKind::ProxyApplyMismatch => Some(Alert::apply_failed()),
        ErrorKind::StorageUnavailable => Some(Alert::storage_failed(&error.to_string())),
        ErrorKind::ConnectionFailure => Some(Alert::connection_failed()),
        ErrorKind::InvalidConfig | ErrorKind::ServiceUnavailable => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== RawConfig Tests ====================

    fn raw(host: &str, port: PortInput) -> RawConfig {
        RawConfig {
            host: host.to_string(),
            port,
            username: None,
            password: None,
            whitelist: vec![],
        }
    }

    #[test]
    fn raw_config_accepts_numeric_and_text_ports() {
        let (target, _) = raw("10.0.0.1", PortInput::Number(1080)).validate().unwrap();
        assert_eq!(target.port(), 1080);

        let (target, _) = raw("10.0.0.1", PortInput::Text(" 9050 ".into()))
            .validate()
            .unwrap();
        assert_eq!(target.port(), 9050);
    }

    #[test]
    fn raw_config_rejects_bad_input() {
        assert_eq!(
            raw("", PortInput::Number(1080)).validate().unwrap_err(),
            ConfigError::EmptyHost
        );
        assert!(matches!(
            raw("10.0.0.1", PortInput::Number(70000)).validate(),
            Err(ConfigError::InvalidPort(_))
        ));
        assert!(matches!(
            raw("10.0.0.1", PortInput::Text("socks".into())).validate(),
            Err(ConfigError::InvalidPort(_))
        ));

        let mut config = raw("10.0.0.1", PortInput::Number(1080));
        config.whitelist = vec!["bad host".into()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPattern(_))
        ));
    }

    #[test]
    fn raw_config_from_json() {
        let config: RawConfig = serde_json::from_value(serde_json::json!({
            "host": "10.0.0.1",
            "port": "1080",
            "username": "user",
            "password": "secret",
            "whitelist": ["*.example.com", ""]
        }))
        .unwrap();

        let (target, whitelist) = config.validate().unwrap();
        assert_eq!(target.credentials().unwrap().username, "user");
        assert_eq!(whitelist.len(), 1);
    }

    // ==================== Status Tests ====================

    #[test]
    fn status_hides_password() {
        let state = PersistedState {
            enabled: true,
            target: ProxyTarget::new("10.0.0.1", 1080)
                .unwrap()
                .with_credentials(Some("user".into()), Some("secret".into())),
            whitelist: Whitelist::parse(["*.example.com"]).unwrap(),
        };
        let status = ProxyStatus::new(ProxyMode::Proxied, &state, IndicatorStatus::On, None);

        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("secret"));
        assert_eq!(status.target.username.as_deref(), Some("user"));
        assert!(status.bypass.contains(&".example.com".to_string()));
    }

    #[test]
    fn alerts_by_kind() {
        assert_eq!(
            alert_for(&ProxyError::HostService("x".into())),
            Some(Alert::apply_failed())
        );
        assert_eq!(
            alert_for(&ProxyError::ConnectionFailure("x".into())),
            Some(Alert::connection_failed())
        );
        assert_eq!(alert_for(&ProxyError::ServiceUnavailable), None);
    }

    #[test]
    fn config_builder() {
        let config = ServiceConfig::default()
            .with_host_timeout(Duration::from_secs(3))
            .with_queue_capacity(0)
            .with_notifications(false);
        assert_eq!(config.host_timeout, Duration::from_secs(3));
        assert_eq!(config.queue_capacity, 1);
        assert!(!config.notifications_enabled);
        assert_eq!(config.notification_cooldown, Duration::from_millis(5000));
    }
}
