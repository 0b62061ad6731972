//! Site values and registrable-domain reduction

use std::fmt;
use std::net::IpAddr;

use url::Url;

use super::Origin;
use crate::utils::PolicyError;

/// Reduce a host to its registrable domain (eTLD+1) using the public
/// suffix list, private suffixes included.
///
/// IP addresses, single-label hosts and bare suffixes reduce to themselves.
pub fn registrable_domain(host: &str) -> &str {
    let host = host.trim_end_matches('.');
    if host.starts_with('[') || host.parse::<IpAddr>().is_ok() {
        return host;
    }
    psl::domain_str(host).unwrap_or(host)
}

/// A site: scheme plus the host every member origin shares
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Site {
    scheme: String,
    host: String,
}

impl Site {
    pub fn new(scheme: &str, host: &str) -> Self {
        Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.trim_end_matches('.').to_ascii_lowercase(),
        }
    }

    /// Parse `scheme://host` (path, port and query are ignored)
    pub fn parse(input: &str) -> Result<Self, PolicyError> {
        let url = Url::parse(input.trim()).map_err(|_| PolicyError::InvalidUrl(input.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| PolicyError::InvalidUrl(input.to_string()))?;
        Ok(Self::new(url.scheme(), host))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Check whether an origin's host is this site's host or one of its
    /// subdomains, under the same scheme
    pub fn contains(&self, origin: &Origin) -> bool {
        match origin {
            Origin::Tuple { scheme, host, .. } => {
                *scheme == self.scheme
                    && (*host == self.host
                        || (host.len() > self.host.len()
                            && host.ends_with(&self.host)
                            && host.as_bytes()[host.len() - self.host.len() - 1] == b'.'))
            }
            Origin::Opaque(_) => false,
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("example.com"), "example.com");
        assert_eq!(registrable_domain("a.b.example.com"), "example.com");
        assert_eq!(registrable_domain("www.bbc.co.uk"), "bbc.co.uk");
        assert_eq!(registrable_domain("co.uk"), "co.uk");
        assert_eq!(registrable_domain("user.github.io"), "user.github.io");
        assert_eq!(registrable_domain("localhost"), "localhost");
        assert_eq!(registrable_domain("127.0.0.1"), "127.0.0.1");
        assert_eq!(registrable_domain("[::1]"), "[::1]");
    }

    #[test]
    fn test_registrable_domain_multi_label_suffixes() {
        assert_eq!(registrable_domain("alice.gov.au"), "alice.gov.au");
        assert_eq!(registrable_domain("www.bob.gov.au"), "bob.gov.au");
        assert_eq!(registrable_domain("gov.au"), "gov.au");
        assert_eq!(registrable_domain("x.s3.amazonaws.com"), "x.s3.amazonaws.com");
        assert_ne!(
            registrable_domain("x.s3.amazonaws.com"),
            registrable_domain("y.s3.amazonaws.com")
        );
    }

    #[test]
    fn test_distinct_principals_under_public_suffix_are_cross_site() {
        let alice = Origin::parse("https://alice.gov.au").unwrap();
        let bob = Origin::parse("https://bob.gov.au").unwrap();
        assert_eq!(alice.site(), Some(Site::new("https", "alice.gov.au")));
        assert!(!alice.is_same_site(&bob));

        let x = Origin::parse("https://x.s3.amazonaws.com").unwrap();
        let y = Origin::parse("https://y.s3.amazonaws.com").unwrap();
        assert!(!x.is_same_site(&y));
    }

    #[test]
    fn test_site_contains() {
        let site = Site::new("https", "isolated.foo.com");
        assert!(site.contains(&Origin::new("https", "isolated.foo.com", 443)));
        assert!(site.contains(&Origin::new("https", "a.isolated.foo.com", 8443)));
        assert!(!site.contains(&Origin::new("https", "foo.com", 443)));
        assert!(!site.contains(&Origin::new("https", "xisolated.foo.com", 443)));
        assert!(!site.contains(&Origin::new("http", "isolated.foo.com", 80)));
        assert!(!site.contains(&Origin::opaque()));
    }

    #[test]
    fn test_site_parse() {
        let site = Site::parse("https://coop.com:8443/path").unwrap();
        assert_eq!(site, Site::new("https", "coop.com"));
        assert_eq!(site.to_string(), "https://coop.com");
        assert!(Site::parse("data:text/plain,x").is_err());
    }
}
