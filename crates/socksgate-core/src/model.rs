//! Proxy target, whitelist and persisted state types.
//!
//! Every type here validates on construction, so a value that exists is a
//! value the rest of the system may apply without re-checking. Serde goes
//! through the same constructors (`try_from`), which keeps hand-edited or
//! imported JSON from smuggling in an empty host or a malformed pattern.

use std::fmt;
use std::net::IpAddr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default upstream proxy host.
pub const DEFAULT_PROXY_HOST: &str = "127.0.0.1";

/// Default upstream proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 1080;

static HOSTNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)[a-z0-9_]([a-z0-9_-]*[a-z0-9_])?(\.[a-z0-9_]([a-z0-9_-]*[a-z0-9_])?)*\.?$")
        .expect("hostname regex is valid")
});

fn is_valid_host(host: &str) -> bool {
    let unbracketed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    unbracketed.parse::<IpAddr>().is_ok() || HOSTNAME_RE.is_match(host)
}

// ============================================================================
// Proxy Target
// ============================================================================

/// Proxy scheme. Only SOCKS5 upstreams are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    #[default]
    Socks5,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional proxy credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// The upstream SOCKS5 proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawProxyTarget", into = "RawProxyTarget")]
pub struct ProxyTarget {
    scheme: ProxyScheme,
    host: String,
    port: u16,
    credentials: Option<Credentials>,
}

impl ProxyTarget {
    /// Creates a validated target. The host is trimmed.
    pub fn new(host: impl AsRef<str>, port: u16) -> Result<Self> {
        let host = host.as_ref().trim();
        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if !is_valid_host(host) {
            return Err(ConfigError::InvalidHost(host.to_string()));
        }
        if port == 0 {
            return Err(ConfigError::InvalidPort(port.to_string()));
        }

        Ok(Self {
            scheme: ProxyScheme::Socks5,
            host: host.to_string(),
            port,
            credentials: None,
        })
    }

    /// Parses a textual port as typed into a settings form.
    pub fn parse_port(raw: &str) -> Result<u16> {
        let trimmed = raw.trim();
        match trimmed.parse::<u32>() {
            Ok(port) if (1..=u16::MAX as u32).contains(&port) => Ok(port as u16),
            _ => Err(ConfigError::InvalidPort(trimmed.to_string())),
        }
    }

    /// Attaches credentials. They are kept only when both parts are non-empty.
    pub fn with_credentials(
        mut self,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        self.credentials = match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Credentials { username, password })
            }
            _ => None,
        };
        self
    }

    pub fn scheme(&self) -> ProxyScheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// `host:port`, bracketing bare IPv6 literals.
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Returns the proxy URL, without credentials.
    pub fn proxy_url(&self) -> String {
        format!("{}://{}", self.scheme, self.endpoint())
    }

    /// True when both targets point at the same upstream endpoint.
    pub fn same_endpoint(&self, other: &ProxyTarget) -> bool {
        self.host.eq_ignore_ascii_case(&other.host) && self.port == other.port
    }
}

impl Default for ProxyTarget {
    fn default() -> Self {
        Self {
            scheme: ProxyScheme::Socks5,
            host: DEFAULT_PROXY_HOST.to_string(),
            port: DEFAULT_PROXY_PORT,
            credentials: None,
        }
    }
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.proxy_url())
    }
}

/// Wire form of [`ProxyTarget`] (`proxyConfig` in the persisted layout).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawProxyTarget {
    host: String,
    port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
}

impl TryFrom<RawProxyTarget> for ProxyTarget {
    type Error = ConfigError;

    fn try_from(raw: RawProxyTarget) -> Result<Self> {
        Ok(ProxyTarget::new(raw.host, raw.port)?.with_credentials(raw.username, raw.password))
    }
}

impl From<ProxyTarget> for RawProxyTarget {
    fn from(target: ProxyTarget) -> Self {
        let (username, password) = match target.credentials {
            Some(c) => (Some(c.username), Some(c.password)),
            None => (None, None),
        };
        Self {
            host: target.host,
            port: target.port,
            username,
            password,
        }
    }
}

// ============================================================================
// Whitelist
// ============================================================================

/// A normalized whitelist entry: `example.com` or `*.example.com`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WhitelistPattern(String);

/// The two shapes a [`WhitelistPattern`] can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind<'a> {
    /// Matches only this host.
    Exact(&'a str),
    /// Matches the base domain and every subdomain of it.
    Wildcard(&'a str),
}

impl WhitelistPattern {
    /// Trims, lower-cases and validates a pattern. One trailing dot is
    /// dropped so `example.com.` and `example.com` are the same entry.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let normalized = trimmed
            .strip_suffix('.')
            .unwrap_or(trimmed)
            .to_ascii_lowercase();
        let invalid = || ConfigError::InvalidPattern(trimmed.to_string());

        if normalized.is_empty() || normalized.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        let base = normalized.strip_prefix("*.").unwrap_or(&normalized);
        if base.is_empty() || base.ends_with('.') || base.contains('*') || !is_valid_host(base) {
            return Err(invalid());
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> PatternKind<'_> {
        match self.0.strip_prefix("*.") {
            Some(base) => PatternKind::Wildcard(base),
            None => PatternKind::Exact(&self.0),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self.kind(), PatternKind::Wildcard(_))
    }
}

impl fmt::Display for WhitelistPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WhitelistPattern {
    type Error = ConfigError;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<WhitelistPattern> for String {
    fn from(pattern: WhitelistPattern) -> Self {
        pattern.0
    }
}

/// Insertion-ordered set of whitelist patterns.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Whitelist(Vec<WhitelistPattern>);

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses raw entries. Blank entries are skipped, malformed ones rejected.
    pub fn parse<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut whitelist = Self::new();
        for entry in entries {
            let entry = entry.as_ref();
            if entry.trim().is_empty() {
                continue;
            }
            whitelist.insert(WhitelistPattern::parse(entry)?);
        }
        Ok(whitelist)
    }

    /// Adds a pattern. Returns false if it was already present.
    pub fn insert(&mut self, pattern: WhitelistPattern) -> bool {
        if self.0.contains(&pattern) {
            return false;
        }
        self.0.push(pattern);
        true
    }

    pub fn remove(&mut self, pattern: &WhitelistPattern) -> bool {
        let before = self.0.len();
        self.0.retain(|p| p != pattern);
        self.0.len() != before
    }

    pub fn contains(&self, pattern: &WhitelistPattern) -> bool {
        self.0.contains(pattern)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WhitelistPattern> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|p| p.0.clone()).collect()
    }
}

impl FromIterator<WhitelistPattern> for Whitelist {
    fn from_iter<T: IntoIterator<Item = WhitelistPattern>>(iter: T) -> Self {
        let mut whitelist = Self::new();
        for pattern in iter {
            whitelist.insert(pattern);
        }
        whitelist
    }
}

impl<'a> IntoIterator for &'a Whitelist {
    type Item = &'a WhitelistPattern;
    type IntoIter = std::slice::Iter<'a, WhitelistPattern>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl TryFrom<Vec<String>> for Whitelist {
    type Error = ConfigError;

    fn try_from(entries: Vec<String>) -> Result<Self> {
        Self::parse(entries)
    }
}

impl From<Whitelist> for Vec<String> {
    fn from(whitelist: Whitelist) -> Self {
        whitelist.0.into_iter().map(String::from).collect()
    }
}

// ============================================================================
// Mode and Persisted State
// ============================================================================

/// Whether traffic goes straight out or through the upstream proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    #[default]
    Direct,
    Proxied,
}

impl ProxyMode {
    /// The mode requested by a persisted `enabled` flag.
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            Self::Proxied
        } else {
            Self::Direct
        }
    }

    pub fn is_proxied(&self) -> bool {
        matches!(self, Self::Proxied)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Proxied => "proxied",
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that survives a restart.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistedState {
    /// Whether the user asked for the proxy to be on.
    #[serde(rename = "proxyEnabled", default)]
    pub enabled: bool,
    #[serde(rename = "proxyConfig", default)]
    pub target: ProxyTarget,
    #[serde(rename = "whitelistDomains", default)]
    pub whitelist: Whitelist,
}

impl PersistedState {
    /// The mode this state asks for.
    pub fn requested_mode(&self) -> ProxyMode {
        ProxyMode::from_enabled(self.enabled)
    }
}

/// Partial update for the config store. Supplied fields replace the stored
/// sub-record wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub enabled: Option<bool>,
    pub target: Option<ProxyTarget>,
    pub whitelist: Option<Whitelist>,
}

impl StateUpdate {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub fn config(target: ProxyTarget, whitelist: Whitelist) -> Self {
        Self {
            enabled: None,
            target: Some(target),
            whitelist: Some(whitelist),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_none() && self.target.is_none() && self.whitelist.is_none()
    }

    /// Produces the merged record without touching `current`.
    pub fn apply_to(&self, current: &PersistedState) -> PersistedState {
        PersistedState {
            enabled: self.enabled.unwrap_or(current.enabled),
            target: self.target.clone().unwrap_or_else(|| current.target.clone()),
            whitelist: self
                .whitelist
                .clone()
                .unwrap_or_else(|| current.whitelist.clone()),
        }
    }
}
