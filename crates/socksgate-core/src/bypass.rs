//! Bypass list construction.
//!
//! Turns the user's whitelist into the exception rules handed to the host
//! proxy service. `localhost` and `127.0.0.1` are always present.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::model::{PatternKind, Whitelist, WhitelistPattern};

/// Rules present in every bypass list.
pub const BUILTIN_BYPASS: [&str; 2] = ["localhost", "127.0.0.1"];

/// One exception rule for the host proxy service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BypassRule {
    /// Exactly this host.
    Host(String),
    /// The domain and all of its subdomains.
    Domain(String),
}

impl BypassRule {
    /// Canonical token. Domains use the leading-dot suffix form
    /// (`.example.com`) understood by `NO_PROXY`-style lists.
    pub fn token(&self) -> String {
        match self {
            Self::Host(host) => host.clone(),
            Self::Domain(base) => format!(".{}", base),
        }
    }

    /// Parses a canonical token back into a rule.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim().to_ascii_lowercase();
        if let Some(base) = token.strip_prefix("*.").or_else(|| token.strip_prefix('.')) {
            return (!base.is_empty()).then(|| Self::Domain(base.to_string()));
        }
        (!token.is_empty()).then_some(Self::Host(token))
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::Host(host) if BUILTIN_BYPASS.contains(&host.as_str()))
    }
}

impl From<&WhitelistPattern> for BypassRule {
    fn from(pattern: &WhitelistPattern) -> Self {
        match pattern.kind() {
            PatternKind::Exact(host) => Self::Host(host.to_string()),
            PatternKind::Wildcard(base) => Self::Domain(base.to_string()),
        }
    }
}

impl fmt::Display for BypassRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

impl Serialize for BypassRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.token())
    }
}

/// A deduplicated set of bypass rules that always holds the built-ins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BypassList(BTreeSet<BypassRule>);

impl BypassList {
    /// A list holding only the built-in rules.
    pub fn builtin() -> Self {
        Self(
            BUILTIN_BYPASS
                .iter()
                .map(|host| BypassRule::Host(host.to_string()))
                .collect(),
        )
    }

    /// Builds the list from a whitelist.
    pub fn build(whitelist: &Whitelist) -> Self {
        let mut list = Self::builtin();
        list.0.extend(whitelist.iter().map(BypassRule::from));
        list
    }

    /// Rebuilds a list from rules read back from a host service. The
    /// built-ins are added if the host dropped them.
    pub fn from_rules<I: IntoIterator<Item = BypassRule>>(rules: I) -> Self {
        let mut list = Self::builtin();
        list.0.extend(rules);
        list
    }

    pub fn contains(&self, rule: &BypassRule) -> bool {
        self.0.contains(rule)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BypassRule> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.0.iter().map(BypassRule::token).collect()
    }
}

impl Default for BypassList {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Builds the bypass rules for a whitelist.
pub fn build(whitelist: &Whitelist) -> BypassList {
    BypassList::build(whitelist)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whitelist(entries: &[&str]) -> Whitelist {
        Whitelist::parse(entries.iter().copied()).unwrap()
    }

    fn host(h: &str) -> BypassRule {
        BypassRule::Host(h.to_string())
    }

    fn domain(d: &str) -> BypassRule {
        BypassRule::Domain(d.to_string())
    }

    #[test]
    fn empty_whitelist_yields_builtins() {
        let list = build(&Whitelist::new());
        assert_eq!(list.len(), 2);
        assert!(list.contains(&host("localhost")));
        assert!(list.contains(&host("127.0.0.1")));
    }

    #[test]
    fn wildcard_becomes_domain_rule() {
        let list = build(&whitelist(&["*.example.com"]));
        let expected: BTreeSet<_> = [host("localhost"), host("127.0.0.1"), domain("example.com")]
            .into_iter()
            .collect();
        assert_eq!(list.0, expected);
    }

    #[test]
    fn exact_host_is_kept_unchanged() {
        let list = build(&whitelist(&["intranet.local"]));
        assert!(list.contains(&host("intranet.local")));
    }

    #[test]
    fn builtins_are_not_duplicated() {
        let list = build(&whitelist(&["localhost", "127.0.0.1", "LOCALHOST"]));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn exact_and_wildcard_of_same_base_are_distinct() {
        let list = build(&whitelist(&["example.com", "*.example.com"]));
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn build_is_idempotent() {
        let w = whitelist(&["*.a.com", "b.org", "*.c.net"]);
        assert_eq!(build(&w), build(&w));
    }

    #[test]
    fn tokens_use_suffix_form_for_domains() {
        let list = build(&whitelist(&["*.example.com"]));
        let tokens = list.tokens();
        assert!(tokens.contains(&".example.com".to_string()));
        assert!(tokens.contains(&"localhost".to_string()));
    }

    #[test]
    fn token_round_trip() {
        assert_eq!(BypassRule::from_token(".example.com"), Some(domain("example.com")));
        assert_eq!(BypassRule::from_token("*.example.com"), Some(domain("example.com")));
        assert_eq!(BypassRule::from_token("Host.Local"), Some(host("host.local")));
        assert_eq!(BypassRule::from_token(""), None);
        assert_eq!(BypassRule::from_token("."), None);
    }

    #[test]
    fn from_rules_restores_builtins() {
        let list = BypassList::from_rules([domain("example.com")]);
        assert!(list.contains(&host("localhost")));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn builtin_detection() {
        assert!(host("localhost").is_builtin());
        assert!(!domain("localhost").is_builtin());
        assert!(!host("example.com").is_builtin());
    }

    #[test]
    fn serializes_as_token_array() {
        let list = build(&whitelist(&["*.example.com"]));
        let value = serde_json::to_value(&list).unwrap();
        assert!(value.as_array().unwrap().contains(&serde_json::json!(".example.com")));
    }
}
