//! SocksGate Core - Proxy configuration model, whitelist matching, and alerts.
//!
//! This crate holds the logic shared by every SocksGate component:
//!
//! - Validated configuration types (`ProxyTarget`, `Whitelist`, `PersistedState`)
//! - Whitelist matching against host names and URLs
//! - Bypass rule construction for the host proxy service
//! - Rate-limited failure notifications
//! - The user-visible on/off indicator
//!
//! # Example
//!
//! ```
//! use socksgate_core::{bypass, matcher, Whitelist};
//!
//! let whitelist = Whitelist::parse(["*.example.com"]).unwrap();
//! assert!(matcher::is_whitelisted(&whitelist, "https://docs.example.com/"));
//!
//! let rules = bypass::build(&whitelist);
//! assert_eq!(rules.len(), 3);
//! ```

pub mod bypass;
pub mod error;
pub mod indicator;
pub mod matcher;
pub mod model;
pub mod notifications;

pub use bypass::{BypassList, BypassRule, BUILTIN_BYPASS};
pub use error::{ConfigError, Result};
pub use indicator::{Indicator, IndicatorStatus, SharedIndicator};
pub use model::{
    Credentials, PatternKind, PersistedState, ProxyMode, ProxyScheme, ProxyTarget, StateUpdate,
    Whitelist, WhitelistPattern, DEFAULT_PROXY_HOST, DEFAULT_PROXY_PORT,
};
pub use notifications::{
    default_sink, Alert, AlertSink, LogAlertSink, NotificationResult, NotificationSettings,
    Notifier, NOTIFICATION_COOLDOWN,
};

#[cfg(feature = "notifications")]
pub use notifications::DesktopAlertSink;
