//! Proxy state machine.
//!
//! Two states, `Direct` and `Proxied`. A transition installs the matching
//! host configuration, reads it back to confirm, persists the `enabled`
//! flag and only then updates the indicator. Any failure restores the
//! previous host configuration and leaves the persisted flag alone. If the
//! host cannot be restored, the in-memory mode follows what the host reads
//! back as, so the reported mode is never stale.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use socksgate_core::{bypass, Indicator, IndicatorStatus, PersistedState, ProxyMode, StateUpdate};
use socksgate_storage::ConfigStore;
use tracing::{debug, error, info, warn};

use crate::error::{ProxyError, Result};
use crate::host::{HostProxyConfig, HostProxyService};

/// Default bound on each call into the host proxy service.
pub const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_secs(10);

/// Drives the host proxy service between `Direct` and `Proxied`.
pub struct ProxyController {
    host: Arc<dyn HostProxyService>,
    store: ConfigStore,
    indicator: Arc<dyn Indicator>,
    host_timeout: Duration,
    mode: ProxyMode,
    /// Last configuration known to be installed on the host.
    installed: HostProxyConfig,
}

impl ProxyController {
    pub fn new(
        host: Arc<dyn HostProxyService>,
        store: ConfigStore,
        indicator: Arc<dyn Indicator>,
    ) -> Self {
        Self {
            host,
            store,
            indicator,
            host_timeout: DEFAULT_HOST_TIMEOUT,
            mode: ProxyMode::Direct,
            installed: HostProxyConfig::Direct,
        }
    }

    pub fn with_host_timeout(mut self, timeout: Duration) -> Self {
        self.host_timeout = timeout;
        self
    }

    /// Current mode.
    pub fn mode(&self) -> ProxyMode {
        self.mode
    }

    /// Configuration last installed by a successful transition.
    pub fn installed(&self) -> &HostProxyConfig {
        &self.installed
    }

    pub fn indicator(&self) -> IndicatorStatus {
        self.indicator.current()
    }

    /// Host configuration for `mode` under `state`.
    pub fn desired_config(mode: ProxyMode, state: &PersistedState) -> HostProxyConfig {
        match mode {
            ProxyMode::Direct => HostProxyConfig::Direct,
            ProxyMode::Proxied => {
                HostProxyConfig::fixed(state.target.clone(), bypass::build(&state.whitelist))
            }
        }
    }

    /// Moves to `target_mode` using the configuration in `state`. Returns
    /// the persisted state after the transition.
    pub async fn set_mode(
        &mut self,
        target_mode: ProxyMode,
        state: &PersistedState,
    ) -> Result<PersistedState> {
        let desired = Self::desired_config(target_mode, state);
        info!(from = %self.mode, to = %target_mode, "Proxy transition requested");

        self.install(&desired).await?;

        let persisted = match self
            .store
            .update(StateUpdate::enabled(target_mode.is_proxied()))
            .await
        {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(error = %e, "Could not persist proxy state");
                self.rollback().await;
                return Err(ProxyError::Storage(e));
            }
        };

        self.commit(target_mode, desired);
        info!(mode = %self.mode, "Proxy transition complete");
        Ok(persisted)
    }

    /// Startup sequence: force `Direct` without touching the persisted flag,
    /// then attempt the mode the persisted state asks for. A failure to reach
    /// `Direct` ends the sequence with that error.
    pub async fn cold_start(&mut self) -> Result<PersistedState> {
        info!("Cold start: forcing direct mode");
        if let Err(e) = self.install(&HostProxyConfig::Direct).await {
            warn!(error = %e, "Could not force direct mode at startup");
            return Err(e);
        }
        self.commit(ProxyMode::Direct, HostProxyConfig::Direct);

        let state = self.store.get().await?;
        if state.requested_mode() == ProxyMode::Direct {
            return Ok(state);
        }

        self.set_mode(state.requested_mode(), &state).await
    }

    /// Applies `desired` and verifies it. On any failure, including a
    /// timeout or an apply that stopped half way, the previous
    /// configuration is restored.
    async fn install(&mut self, desired: &HostProxyConfig) -> Result<()> {
        if let Err(e) = self.bounded(self.host.apply(desired)).await {
            warn!(error = %e, "Host rejected proxy settings");
            self.rollback().await;
            return Err(e);
        }

        if let Err(e) = self.verify(desired).await {
            warn!(error = %e, "Host did not confirm proxy settings");
            self.rollback().await;
            return Err(e);
        }

        Ok(())
    }

    async fn verify(&self, desired: &HostProxyConfig) -> Result<()> {
        let reported = self.bounded(self.host.active()).await?;
        debug!(%reported, "Host reports proxy settings");

        if desired.is_satisfied_by(&reported) {
            Ok(())
        } else {
            Err(ProxyError::ApplyMismatch {
                expected: desired.to_string(),
                actual: reported.to_string(),
            })
        }
    }

    /// Best effort: reinstall the last known-good configuration, then read
    /// the host back so the in-memory mode matches it.
    async fn rollback(&mut self) {
        info!(config = %self.installed, "Restoring previous proxy settings");

        if let Err(e) = self.bounded(self.host.apply(&self.installed)).await {
            warn!(error = %e, "Could not restore previous proxy settings");
        }
        self.reconcile().await;
    }

    /// Adopts whatever the host reports when it differs from the last
    /// installed configuration.
    async fn reconcile(&mut self) {
        match self.bounded(self.host.active()).await {
            Ok(reported) if self.installed.is_satisfied_by(&reported) => {}
            Ok(reported) => {
                error!(expected = %self.installed, %reported, "Host proxy settings diverged");
                self.commit(reported.mode(), reported);
            }
            Err(e) => warn!(error = %e, "Could not read back host proxy settings"),
        }
    }

    fn commit(&mut self, mode: ProxyMode, installed: HostProxyConfig) {
        self.mode = mode;
        self.installed = installed;

        if let Err(e) = self.indicator.set(IndicatorStatus::from_mode(mode)) {
            warn!(error = %e, "Could not update indicator");
        }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.host_timeout, call)
            .await
            .map_err(|_| ProxyError::Timeout(self.host_timeout))?
    }
}
