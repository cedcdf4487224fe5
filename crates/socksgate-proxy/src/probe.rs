//! Upstream reachability probe.
//!
//! System proxies do not report failed connections back to us, so while the
//! proxy is on we periodically open a TCP connection to the upstream and
//! publish a [`HostEvent::ConnectionFailed`] when that fails. The proxy
//! service turns the event into an alert and a recorded error.

use std::sync::Arc;
use std::time::Duration;

use socksgate_core::ProxyMode;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ProxyError, Result};
use crate::host::{HostEvent, HostProxyService};
use crate::service::ProxyStatus;

/// Default bound on one probe connection.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Opens and drops a TCP connection to `endpoint`.
pub async fn probe_upstream(endpoint: &str, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, TcpStream::connect(endpoint)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(ProxyError::ConnectionFailure(format!("{}: {}", endpoint, e))),
        Err(_) => Err(ProxyError::ConnectionFailure(format!(
            "{}: no answer within {:?}",
            endpoint, timeout
        ))),
    }
}

/// Probes the upstream every `interval` while the status says `Proxied`,
/// reporting failures through `host`. Stops when the status channel closes.
pub fn spawn_health_probe(
    mut status: watch::Receiver<ProxyStatus>,
    host: Arc<dyn HostProxyService>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let endpoint = {
                let current = status.borrow();
                (current.mode == ProxyMode::Proxied).then(|| current.target.endpoint.clone())
            };
            let Some(endpoint) = endpoint else {
                continue;
            };

            match probe_upstream(&endpoint, PROBE_TIMEOUT).await {
                Ok(()) => debug!(%endpoint, "Upstream proxy reachable"),
                Err(e) => {
                    warn!(error = %e, "Upstream proxy unreachable");
                    host.report(HostEvent::ConnectionFailed {
                        detail: e.to_string(),
                    });
                }
            }
        }

        debug!("Health probe stopped");
    })
}
