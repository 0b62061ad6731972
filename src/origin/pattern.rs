//! Isolated origin patterns

use std::fmt;

use url::Url;

use super::{Origin, Site};
use crate::utils::PolicyError;

/// Marker inserted between the scheme separator and the host of a
/// wildcard pattern, e.g. `https://[*.]example.com`
pub const SUBDOMAIN_WILDCARD: &str = "[*.]";

/// A pattern stored in the isolated origin registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OriginPattern {
    /// Exactly one origin
    Exact(Origin),
    /// Every strict subdomain of `domain` with the given scheme and port
    Subdomains {
        scheme: String,
        domain: String,
        port: u16,
    },
    /// Every origin within a site (used for COOP-triggered isolation)
    Site(Site),
}

impl OriginPattern {
    /// Parse an exact origin (`https://a.com`) or a wildcard
    /// (`https://[*.]a.com`). Opaque origins are rejected.
    pub fn parse(input: &str) -> Result<Self, PolicyError> {
        let input = input.trim();
        let invalid = || PolicyError::InvalidPattern(input.to_string());

        if let Some((scheme, rest)) = input.split_once("://") {
            if let Some(rest) = rest.strip_prefix(SUBDOMAIN_WILDCARD) {
                let url = Url::parse(&format!("{}://{}", scheme, rest)).map_err(|_| invalid())?;
                return match Origin::from_url(&url) {
                    Origin::Tuple { scheme, host, port } => Ok(OriginPattern::Subdomains {
                        scheme,
                        domain: host,
                        port,
                    }),
                    Origin::Opaque(_) => Err(invalid()),
                };
            }
        }

        let origin = Origin::parse(input).map_err(|_| invalid())?;
        if origin.is_opaque() {
            return Err(invalid());
        }
        Ok(OriginPattern::Exact(origin))
    }

    /// Parse a comma-separated list, skipping (and logging) bad entries
    pub fn parse_list(list: &str) -> Vec<Self> {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| match Self::parse(entry) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    log::warn!("Ignoring isolated origin entry: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Check whether the pattern matches an origin
    pub fn matches(&self, origin: &Origin) -> bool {
        match (self, origin) {
            (_, Origin::Opaque(_)) => false,
            (OriginPattern::Exact(exact), _) => exact == origin,
            (
                OriginPattern::Subdomains {
                    scheme,
                    domain,
                    port,
                },
                Origin::Tuple {
                    scheme: s,
                    host,
                    port: p,
                },
            ) => {
                scheme == s
                    && port == p
                    && host.len() > domain.len()
                    && host.ends_with(domain.as_str())
                    && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
            }
            (OriginPattern::Site(site), _) => site.contains(origin),
        }
    }

    /// Ranking used to pick the most specific of several matches: exact
    /// origins first, then wildcards, then whole sites; within a kind the
    /// longer host wins.
    pub fn specificity(&self) -> (u8, usize) {
        match self {
            OriginPattern::Exact(origin) => (2, origin.host().map_or(0, str::len)),
            OriginPattern::Subdomains { domain, .. } => (1, domain.len()),
            OriginPattern::Site(site) => (0, site.host().len()),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, OriginPattern::Subdomains { .. })
    }
}

impl fmt::Display for OriginPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginPattern::Exact(origin) => write!(f, "{}", origin),
            OriginPattern::Subdomains {
                scheme,
                domain,
                port,
            } => {
                let origin = Origin::new(scheme, domain, *port).to_string();
                let host_part = origin.split_once("://").map_or("", |(_, rest)| rest);
                write!(f, "{}://{}{}", scheme, SUBDOMAIN_WILDCARD, host_part)
            }
            OriginPattern::Site(site) => write!(f, "{}", site),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(s: &str) -> Origin {
        Origin::parse(s).unwrap()
    }

    #[test]
    fn test_parse_exact() {
        let pattern = OriginPattern::parse("https://isolated.foo.com/").unwrap();
        assert_eq!(pattern, OriginPattern::Exact(origin("https://isolated.foo.com")));
        assert!(!pattern.is_wildcard());
    }

    #[test]
    fn test_parse_wildcard() {
        let pattern = OriginPattern::parse("https://[*.]example.com").unwrap();
        assert_eq!(
            pattern,
            OriginPattern::Subdomains {
                scheme: "https".to_string(),
                domain: "example.com".to_string(),
                port: 443,
            }
        );
        assert_eq!(pattern.to_string(), "https://[*.]example.com");

        let with_port = OriginPattern::parse("http://[*.]example.com:8080").unwrap();
        assert_eq!(with_port.to_string(), "http://[*.]example.com:8080");
    }

    #[test]
    fn test_parse_rejects_opaque_and_garbage() {
        assert!(OriginPattern::parse("data:text/html,x").is_err());
        assert!(OriginPattern::parse("garbage").is_err());
        assert!(OriginPattern::parse("https://[*.]").is_err());
    }

    #[test]
    fn test_parse_list() {
        let patterns = OriginPattern::parse_list("https://a.com, bogus ,https://[*.]b.com,");
        assert_eq!(patterns.len(), 2);
    }

    #[test]
    fn test_wildcard_matching() {
        let pattern = OriginPattern::parse("https://[*.]example.com").unwrap();
        assert!(pattern.matches(&origin("https://a.example.com")));
        assert!(pattern.matches(&origin("https://a.b.example.com")));
        assert!(!pattern.matches(&origin("https://example.com")));
        assert!(!pattern.matches(&origin("https://badexample.com")));
        assert!(!pattern.matches(&origin("http://a.example.com")));
        assert!(!pattern.matches(&origin("https://a.example.com:8443")));
    }

    #[test]
    fn test_exact_matching() {
        let pattern = OriginPattern::parse("https://example.com").unwrap();
        assert!(pattern.matches(&origin("https://example.com/page")));
        assert!(!pattern.matches(&origin("https://a.example.com")));
        assert!(!pattern.matches(&Origin::opaque()));
    }

    #[test]
    fn test_site_matching() {
        let pattern = OriginPattern::Site(Site::new("https", "coop.com"));
        assert!(pattern.matches(&origin("https://coop.com")));
        assert!(pattern.matches(&origin("https://foo.bar.coop.com")));
        assert!(!pattern.matches(&origin("https://notcoop.com")));
    }

    #[test]
    fn test_specificity_order() {
        let exact = OriginPattern::parse("https://a.example.com").unwrap();
        let long_wildcard = OriginPattern::parse("https://[*.]a.example.com").unwrap();
        let short_wildcard = OriginPattern::parse("https://[*.]example.com").unwrap();
        let site = OriginPattern::Site(Site::new("https", "example.com"));
        assert!(exact.specificity() > long_wildcard.specificity());
        assert!(long_wildcard.specificity() > short_wildcard.specificity());
        assert!(short_wildcard.specificity() > site.specificity());
    }
}
