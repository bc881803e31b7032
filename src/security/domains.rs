//! Navigation allow-list matching.
//!
//! Patterns pair an optional scheme glob with a host glob. The host glob
//! supports a single leading wildcard label (`*.example.com`), and the two
//! pattern forms are deliberately asymmetric:
//!
//! - a bare host (`example.com`) matches that exact host only, never
//!   subdomains;
//! - a wildcard host (`*.example.com`) matches subdomains only, never the
//!   bare domain.
//!
//! Allowing both a site and its subdomains therefore takes two patterns. This
//! asymmetry bounds what an autonomous agent can reach and must not be
//! "unified" into a looser rule.

use crate::errors::{Result, WardenError};
use tracing::warn;
use url::Url;

/// One origin-matching rule: optional scheme glob plus host glob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowListPattern {
    scheme: Option<String>,
    host: String,
}

impl AllowListPattern {
    /// Parse a pattern of the form `host`, `*.host`, or `scheme://host`.
    ///
    /// The scheme part may contain `*` anywhere; the host part accepts `*`
    /// only as a whole (`*`) or as the leading label (`*.example.com`).
    pub fn parse(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(WardenError::Validation(
                "allow-list pattern is empty".to_string(),
            ));
        }

        let (scheme, host) = match trimmed.split_once("://") {
            Some((scheme, host)) => (Some(scheme.to_ascii_lowercase()), host),
            None => (None, trimmed),
        };

        // Strip any path/port the caller left on the host part.
        let host = host
            .split('/')
            .next()
            .unwrap_or(host)
            .split(':')
            .next()
            .unwrap_or(host)
            .to_ascii_lowercase();

        if host.is_empty() {
            return Err(WardenError::Validation(format!(
                "allow-list pattern '{pattern}' has no host"
            )));
        }

        if host == "*" {
            warn!(pattern, "allow-list pattern matches every host");
        } else if let Some(rest) = host.strip_prefix("*.") {
            if rest.is_empty() || rest.contains('*') {
                return Err(WardenError::Validation(format!(
                    "allow-list pattern '{pattern}' must use a single leading wildcard label"
                )));
            }
        } else if host.contains('*') {
            return Err(WardenError::Validation(format!(
                "allow-list pattern '{pattern}' may only use '*' as the leading label"
            )));
        }

        Ok(Self { scheme, host })
    }

    /// Whether this pattern matches the given scheme + host origin.
    pub fn matches(&self, scheme: &str, host: &str) -> bool {
        let scheme_pattern = self.scheme.as_deref().unwrap_or("*");
        if !glob_match(scheme_pattern, &scheme.to_ascii_lowercase()) {
            return false;
        }

        let host = host.to_ascii_lowercase();
        if self.host == "*" {
            return true;
        }
        if let Some(rest) = self.host.strip_prefix("*.") {
            // Subdomains only. `host == rest` is intentionally not a match.
            return host.ends_with(&format!(".{rest}"));
        }
        host == self.host
    }
}

/// Compiled allow-list applied to every navigation routed through a session.
#[derive(Debug, Clone, Default)]
pub struct DomainMatcher {
    patterns: Vec<AllowListPattern>,
}

impl DomainMatcher {
    /// Compile a list of raw patterns. An empty list means unrestricted.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| AllowListPattern::parse(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Decide whether a navigation target is permitted.
    ///
    /// An empty allow-list permits everything (restriction is explicit
    /// opt-in). The result is independent of pattern order: it is true iff
    /// any single pattern matches.
    pub fn is_allowed(&self, url: &Url) -> bool {
        if self.patterns.is_empty() {
            return true;
        }

        let host = match url.host_str() {
            Some(host) => host,
            // Internal blank page, used as the initial tab target.
            None => return url.as_str() == "about:blank",
        };
        self.patterns.iter().any(|p| p.matches(url.scheme(), host))
    }

    /// Convenience wrapper that parses the candidate URL first.
    pub fn is_allowed_str(&self, url: &str) -> Result<bool> {
        if self.patterns.is_empty() {
            return Ok(true);
        }
        if url == "about:blank" {
            return Ok(true);
        }
        let parsed = Url::parse(url)
            .map_err(|e| WardenError::Validation(format!("invalid URL '{url}': {e}")))?;
        Ok(self.is_allowed(&parsed))
    }
}

/// Case-sensitive glob where `*` matches any run of characters. Inputs are
/// lowercased by the callers.
fn glob_match(pattern: &str, input: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == input,
        Some((prefix, rest)) => {
            let remainder = match input.strip_prefix(prefix) {
                Some(remainder) => remainder,
                None => return false,
            };
            if rest.is_empty() {
                return true;
            }
            // Try every split point for the consumed wildcard.
            (0..=remainder.len())
                .filter(|i| remainder.is_char_boundary(*i))
                .any(|i| glob_match(rest, &remainder[i..]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> DomainMatcher {
        let owned: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        DomainMatcher::new(&owned).unwrap()
    }

    fn allowed(m: &DomainMatcher, url: &str) -> bool {
        m.is_allowed(&Url::parse(url).unwrap())
    }

    #[test]
    fn empty_allow_list_permits_everything() {
        let m = matcher(&[]);
        assert!(allowed(&m, "https://example.com"));
        assert!(allowed(&m, "http://anything.else/path"));
    }

    #[test]
    fn bare_host_matches_exact_host_only() {
        let m = matcher(&["example.com"]);
        assert!(allowed(&m, "https://example.com"));
        assert!(allowed(&m, "https://example.com/path?q=1"));
        assert!(!allowed(&m, "https://sub.example.com"));
        assert!(!allowed(&m, "https://example.com.evil.com"));
        assert!(!allowed(&m, "https://notexample.com"));
    }

    #[test]
    fn wildcard_host_matches_subdomains_only() {
        let m = matcher(&["*.example.com"]);
        assert!(allowed(&m, "https://abc.example.com"));
        assert!(allowed(&m, "https://a.b.example.com"));
        assert!(!allowed(&m, "https://example.com"));
        assert!(!allowed(&m, "https://evil-example.com"));
        assert!(!allowed(&m, "https://example.com.evil.com"));
    }

    #[test]
    fn bare_and_wildcard_together_cover_both() {
        let m = matcher(&["example.com", "*.example.com"]);
        assert!(allowed(&m, "https://example.com"));
        assert!(allowed(&m, "https://sub.example.com"));
        assert!(!allowed(&m, "https://other.com"));
    }

    #[test]
    fn host_matching_is_case_insensitive() {
        let m = matcher(&["Example.COM"]);
        assert!(allowed(&m, "https://EXAMPLE.com"));
    }

    #[test]
    fn scheme_glob_restricts_scheme() {
        let m = matcher(&["https://example.com"]);
        assert!(allowed(&m, "https://example.com"));
        assert!(!allowed(&m, "http://example.com"));

        let m = matcher(&["http*://example.com"]);
        assert!(allowed(&m, "http://example.com"));
        assert!(allowed(&m, "https://example.com"));
        assert!(!allowed(&m, "ftp://example.com"));
    }

    #[test]
    fn omitted_scheme_matches_any_scheme() {
        let m = matcher(&["example.com"]);
        assert!(allowed(&m, "http://example.com"));
        assert!(allowed(&m, "ftp://example.com"));
    }

    #[test]
    fn star_host_matches_everything() {
        let m = matcher(&["*"]);
        assert!(allowed(&m, "https://anything.com"));
        assert!(allowed(&m, "https://example.org"));
    }

    #[test]
    fn result_is_independent_of_pattern_order() {
        let forward = matcher(&["example.com", "*.trusted.org", "api.other.net"]);
        let backward = matcher(&["api.other.net", "*.trusted.org", "example.com"]);
        for url in [
            "https://example.com",
            "https://sub.example.com",
            "https://x.trusted.org",
            "https://trusted.org",
            "https://api.other.net",
            "https://other.net",
        ] {
            assert_eq!(allowed(&forward, url), allowed(&backward, url), "{url}");
        }
    }

    #[test]
    fn about_blank_is_always_reachable() {
        let m = matcher(&["example.com"]);
        assert!(m.is_allowed_str("about:blank").unwrap());
        assert!(!m.is_allowed_str("https://other.com").unwrap());
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert!(DomainMatcher::new(&["".to_string()]).is_err());
        assert!(DomainMatcher::new(&["https://".to_string()]).is_err());
        assert!(DomainMatcher::new(&["ex*mple.com".to_string()]).is_err());
        assert!(DomainMatcher::new(&["*.*.example.com".to_string()]).is_err());
    }

    #[test]
    fn pattern_ignores_path_and_port() {
        let m = matcher(&["example.com:443/ignored"]);
        assert!(allowed(&m, "https://example.com"));
    }
}
