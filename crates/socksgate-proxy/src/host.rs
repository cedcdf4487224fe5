//! Host proxy service abstraction.
//!
//! The host service is whatever actually routes traffic: the OS system proxy
//! settings, or an in-process stand-in for tests and dry runs.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use socksgate_core::{BypassList, ProxyMode, ProxyTarget};
use tokio::sync::broadcast;

use crate::error::{ProxyError, Result};

/// Capacity of the host event channel.
const EVENT_CAPACITY: usize = 64;

/// A configuration the host proxy service can install.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HostProxyConfig {
    /// No proxy.
    #[default]
    Direct,
    /// Every request goes through `target`, except those matching `bypass`.
    FixedServers {
        target: ProxyTarget,
        bypass: BypassList,
    },
}

impl HostProxyConfig {
    pub fn fixed(target: ProxyTarget, bypass: BypassList) -> Self {
        Self::FixedServers { target, bypass }
    }

    pub fn mode(&self) -> ProxyMode {
        match self {
            Self::Direct => ProxyMode::Direct,
            Self::FixedServers { .. } => ProxyMode::Proxied,
        }
    }

    pub fn target(&self) -> Option<&ProxyTarget> {
        match self {
            Self::Direct => None,
            Self::FixedServers { target, .. } => Some(target),
        }
    }

    pub fn bypass(&self) -> Option<&BypassList> {
        match self {
            Self::Direct => None,
            Self::FixedServers { bypass, .. } => Some(bypass),
        }
    }

    /// True when `reported` installs the same mode and upstream endpoint.
    /// Bypass rules are not compared; not every host reads them back
    /// faithfully.
    pub fn is_satisfied_by(&self, reported: &HostProxyConfig) -> bool {
        match (self, reported) {
            (Self::Direct, Self::Direct) => true,
            (Self::FixedServers { target: a, .. }, Self::FixedServers { target: b, .. }) => {
                a.same_endpoint(b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for HostProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::FixedServers { target, bypass } => {
                write!(f, "{} (bypass: {})", target, bypass.tokens().join(", "))
            }
        }
    }
}

/// Out-of-band reports from the host proxy layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// The host proxy layer reported an error.
    ProxyError { error: String, fatal: bool },
    /// A request failed because the upstream proxy could not be reached.
    ConnectionFailed { detail: String },
}

/// Something that can install proxy configurations.
#[async_trait]
pub trait HostProxyService: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Installs `config` atomically.
    async fn apply(&self, config: &HostProxyConfig) -> Result<()>;

    /// Reads back the configuration the host currently has in effect.
    async fn active(&self) -> Result<HostProxyConfig>;

    /// Subscribes to out-of-band events.
    fn events(&self) -> broadcast::Receiver<HostEvent>;

    /// Publishes an event observed outside the host layer, such as a failed
    /// upstream probe, to every subscriber.
    fn report(&self, event: HostEvent);
}

// ============================================================================
// In-memory host
// ============================================================================

#[derive(Debug)]
enum ApplyFailure {
    /// Fails without changing anything.
    Reject(String),
    /// Installs the configuration, then reports an error.
    AfterInstall(String),
}

#[derive(Debug, Default)]
struct MemoryState {
    active: HostProxyConfig,
    applied: Vec<HostProxyConfig>,
    /// Outcomes of the next `apply` calls, oldest first.
    apply_failures: VecDeque<ApplyFailure>,
    fail_all_applies: Option<String>,
    /// Fails only applies that would turn the proxy on.
    fail_proxied_applies: Option<String>,
    fail_reads: Option<String>,
    /// Accept applies without changing anything.
    ignore_applies: bool,
    delay: Option<Duration>,
}

/// In-process host proxy service used for dry runs and tests.
#[derive(Debug, Clone)]
pub struct MemoryProxyService {
    state: Arc<Mutex<MemoryState>>,
    events: broadcast::Sender<HostEvent>,
}

impl Default for MemoryProxyService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProxyService {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            events,
        }
    }

    /// Starts with `config` already installed.
    pub fn with_active(config: HostProxyConfig) -> Self {
        let service = Self::new();
        service.state.lock().active = config;
        service
    }

    /// The configuration currently installed.
    pub fn current(&self) -> HostProxyConfig {
        self.state.lock().active.clone()
    }

    /// Every configuration successfully applied, in order.
    pub fn applied(&self) -> Vec<HostProxyConfig> {
        self.state.lock().applied.clone()
    }

    pub fn apply_count(&self) -> usize {
        self.state.lock().applied.len()
    }

    /// Makes the next `apply` fail with `error`.
    pub fn fail_next_apply(&self, error: impl Into<String>) {
        self.state
            .lock()
            .apply_failures
            .push_back(ApplyFailure::Reject(error.into()));
    }

    /// Makes the next `apply` install its configuration and then fail, as a
    /// backend does when a later step of a multi-step apply breaks.
    pub fn fail_next_apply_after_install(&self, error: impl Into<String>) {
        self.state
            .lock()
            .apply_failures
            .push_back(ApplyFailure::AfterInstall(error.into()));
    }

    /// Makes every `apply` fail until cleared with `None`.
    pub fn fail_applies(&self, error: Option<String>) {
        self.state.lock().fail_all_applies = error;
    }

    /// Makes every `FixedServers` apply fail until cleared with `None`.
    pub fn fail_proxied_applies(&self, error: Option<String>) {
        self.state.lock().fail_proxied_applies = error;
    }

    /// Makes `active` fail until cleared with `None`.
    pub fn fail_reads(&self, error: Option<String>) {
        self.state.lock().fail_reads = error;
    }

    /// Accepts applies but keeps the current configuration.
    pub fn ignore_applies(&self, ignore: bool) {
        self.state.lock().ignore_applies = ignore;
    }

    /// Delays every call by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    async fn wait(&self) {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl HostProxyService for MemoryProxyService {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn apply(&self, config: &HostProxyConfig) -> Result<()> {
        self.wait().await;

        let mut state = self.state.lock();
        match state.apply_failures.pop_front() {
            Some(ApplyFailure::Reject(error)) => return Err(ProxyError::HostService(error)),
            Some(ApplyFailure::AfterInstall(error)) => {
                state.active = config.clone();
                state.applied.push(config.clone());
                return Err(ProxyError::HostService(error));
            }
            None => {}
        }
        if let Some(error) = &state.fail_all_applies {
            return Err(ProxyError::HostService(error.clone()));
        }
        if let (Some(error), ProxyMode::Proxied) = (&state.fail_proxied_applies, config.mode()) {
            return Err(ProxyError::HostService(error.clone()));
        }
        if state.ignore_applies {
            return Ok(());
        }

        state.active = config.clone();
        state.applied.push(config.clone());
        Ok(())
    }

    async fn active(&self) -> Result<HostProxyConfig> {
        self.wait().await;

        let state = self.state.lock();
        match &state.fail_reads {
            Some(error) => Err(ProxyError::HostService(error.clone())),
            None => Ok(state.active.clone()),
        }
    }

    fn events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    fn report(&self, event: HostEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
