//! Whitelist matching.
//!
//! Decides whether a destination bypasses the proxy. Matching never fails:
//! an unparsable URL or a malformed host name simply does not match.
//!
//! A wildcard pattern `*.example.com` matches `example.com` itself as well
//! as any subdomain at any depth (`a.example.com`, `a.b.example.com`).

use url::Url;

use crate::model::{PatternKind, Whitelist, WhitelistPattern};

/// Trims and lower-cases a host name. Returns `None` for input that cannot
/// be a host name.
fn normalize_host(hostname: &str) -> Option<String> {
    let host = hostname.trim();
    if host.is_empty() || host.chars().any(|c| c.is_whitespace() || c == '/') {
        return None;
    }

    Some(host.to_ascii_lowercase())
}

/// Checks whether `hostname` matches `pattern`.
pub fn matches(pattern: &WhitelistPattern, hostname: &str) -> bool {
    let Some(host) = normalize_host(hostname) else {
        return false;
    };

    match pattern.kind() {
        PatternKind::Exact(exact) => host == exact,
        PatternKind::Wildcard(base) => {
            host == base
                || host
                    .strip_suffix(base)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        }
    }
}

/// Extracts the host from a URL, without port and without one trailing
/// dot. `None` when the URL does not parse or has no host (e.g. `mailto:`).
pub fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?;
    // `Url` keeps IPv6 literals bracketed.
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let host = host.strip_suffix('.').unwrap_or(host);
    (!host.is_empty()).then(|| host.to_string())
}

/// Checks whether the host of `url` matches `pattern`.
pub fn matches_url(pattern: &WhitelistPattern, url: &str) -> bool {
    host_of(url).is_some_and(|host| matches(pattern, &host))
}

/// Returns the first whitelist pattern the URL's host matches.
pub fn matching_pattern<'a>(whitelist: &'a Whitelist, url: &str) -> Option<&'a WhitelistPattern> {
    let host = host_of(url)?;
    whitelist.iter().find(|pattern| matches(pattern, &host))
}

/// Checks whether `url` should bypass the proxy.
pub fn is_whitelisted(whitelist: &Whitelist, url: &str) -> bool {
    matching_pattern(whitelist, url).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(raw: &str) -> WhitelistPattern {
        WhitelistPattern::parse(raw).unwrap()
    }

    // ==================== Exact Pattern Tests ====================

    #[test]
    fn exact_matches_same_host() {
        assert!(matches(&pattern("example.com"), "example.com"));
    }

    #[test]
    fn exact_is_case_insensitive() {
        assert!(matches(&pattern("example.com"), "EXAMPLE.com"));
        assert!(matches(&pattern("Example.Com"), "example.com"));
    }

    #[test]
    fn exact_does_not_match_subdomain() {
        assert!(!matches(&pattern("example.com"), "www.example.com"));
        assert!(!matches(&pattern("example.com"), "example.com.evil.net"));
    }

    #[test]
    fn exact_compares_host_literally() {
        assert!(!matches(&pattern("example.com"), "example.com:443"));
        assert!(!matches(&pattern("example.com"), "example.com."));
    }

    #[test]
    fn trailing_dot_pattern_matches_its_host() {
        let exact = pattern("example.com.");
        assert!(matches(&exact, "example.com"));
        assert!(matches_url(&exact, "https://example.com./"));

        let wildcard = pattern("*.example.com.");
        assert!(matches(&wildcard, "www.example.com"));
        assert!(matches_url(&wildcard, "http://www.example.com.:8080/"));
    }

    // ==================== Wildcard Pattern Tests ====================

    #[test]
    fn wildcard_matches_bare_base() {
        assert!(matches(&pattern("*.example.com"), "example.com"));
    }

    #[test]
    fn wildcard_matches_subdomains_at_any_depth() {
        let p = pattern("*.example.com");
        assert!(matches(&p, "www.example.com"));
        assert!(matches(&p, "a.b.c.example.com"));
    }

    #[test]
    fn wildcard_requires_label_boundary() {
        let p = pattern("*.example.com");
        assert!(!matches(&p, "notexample.com"));
        assert!(!matches(&p, "example.com.evil.net"));
        assert!(!matches(&p, "com"));
    }

    #[test]
    fn wildcard_property_over_sample_hosts() {
        let base = "example.com";
        let p = pattern("*.example.com");
        for host in [
            "example.com",
            "x.example.com",
            "xexample.com",
            "example.org",
            "deep.x.example.com",
            "",
        ] {
            let expected = host == base || host.ends_with(".example.com");
            assert_eq!(matches(&p, host), expected, "host {:?}", host);
        }
    }

    // ==================== Malformed Input Tests ====================

    #[test]
    fn malformed_host_never_matches() {
        let p = pattern("*.example.com");
        assert!(!matches(&p, ""));
        assert!(!matches(&p, "   "));
        assert!(!matches(&p, "exa mple.com"));
    }

    #[test]
    fn unparsable_url_never_matches() {
        let p = pattern("example.com");
        assert!(!matches_url(&p, "not a url"));
        assert!(!matches_url(&p, "example.com/path"));
        assert!(!matches_url(&p, "mailto:someone@example.com"));
    }

    // ==================== URL Tests ====================

    #[test]
    fn url_host_is_extracted() {
        let p = pattern("*.example.com");
        assert!(matches_url(&p, "https://api.example.com/v1?q=1"));
        assert!(matches_url(&p, "wss://example.com:8443/socket"));
        assert!(!matches_url(&p, "https://example.net/"));
    }

    #[test]
    fn ipv6_url_host() {
        assert_eq!(host_of("http://[::1]:8080/").as_deref(), Some("::1"));
    }

    #[test]
    fn whitelist_lookup_returns_first_match() {
        let whitelist = Whitelist::parse(["intranet.local", "*.example.com"]).unwrap();
        let found = matching_pattern(&whitelist, "https://docs.example.com/").unwrap();
        assert_eq!(found.as_str(), "*.example.com");
        assert!(is_whitelisted(&whitelist, "http://intranet.local/"));
        assert!(!is_whitelisted(&whitelist, "http://other.local/"));
    }

    #[test]
    fn empty_whitelist_matches_nothing() {
        assert!(!is_whitelisted(&Whitelist::new(), "https://example.com/"));
    }
}
