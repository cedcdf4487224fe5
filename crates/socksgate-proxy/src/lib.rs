//! SocksGate Proxy - host proxy control and the proxy state machine.
//!
//! - [`HostProxyService`]: installs "direct" or "fixed SOCKS5 upstream with
//!   exceptions" configurations ([`SystemProxyService`] for the OS,
//!   [`MemoryProxyService`] for dry runs and tests)
//! - [`ProxyController`]: the `Direct`/`Proxied` state machine with
//!   read-back verification and rollback
//! - [`ProxyService`]: the single owning actor; UIs use a [`ProxyHandle`]

pub mod controller;
pub mod error;
pub mod host;
pub mod probe;
pub mod service;
pub mod system;

pub use controller::{ProxyController, DEFAULT_HOST_TIMEOUT};
pub use error::{ErrorKind, ProxyError, Result};
pub use host::{HostEvent, HostProxyConfig, HostProxyService, MemoryProxyService};
pub use probe::{probe_upstream, spawn_health_probe};
pub use service::{
    ErrorSummary, PortInput, ProxyHandle, ProxyService, ProxyStatus, RawConfig, ServiceConfig,
    TargetSummary,
};
pub use system::SystemProxyService;
