//! Origin and site value types
//!
//! An [`Origin`] is the `(scheme, host, port)` identity of a security
//! principal. A [`Site`] is the coarser `(scheme, registrable domain)`
//! grouping used when no finer-grained isolation applies. Everything in
//! this module is a pure value computation.

mod pattern;
mod site;

pub use pattern::OriginPattern;
pub use site::{Site, registrable_domain};

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use url::Url;

use crate::utils::PolicyError;

/// A web origin
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    /// Scheme, host and port
    Tuple {
        scheme: String,
        host: String,
        port: u16,
    },
    /// Opaque origin with a process-unique nonce; equal only to itself
    Opaque(u64),
}

impl Origin {
    /// Create a tuple origin
    pub fn new(scheme: &str, host: &str, port: u16) -> Self {
        Origin::Tuple {
            scheme: scheme.to_ascii_lowercase(),
            host: host.trim_end_matches('.').to_ascii_lowercase(),
            port,
        }
    }

    /// Create a fresh opaque origin
    pub fn opaque() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Origin::Opaque(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Derive the origin of a parsed URL
    pub fn from_url(url: &Url) -> Self {
        match url.origin() {
            url::Origin::Tuple(scheme, host, port) => Origin::new(&scheme, &host.to_string(), port),
            url::Origin::Opaque(_) => Origin::opaque(),
        }
    }

    /// Parse a URL string and return its origin
    pub fn parse(input: &str) -> Result<Self, PolicyError> {
        let url = Url::parse(input.trim()).map_err(|_| PolicyError::InvalidUrl(input.to_string()))?;
        Ok(Self::from_url(&url))
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Origin::Opaque(_))
    }

    pub fn scheme(&self) -> Option<&str> {
        match self {
            Origin::Tuple { scheme, .. } => Some(scheme),
            Origin::Opaque(_) => None,
        }
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            Origin::Tuple { host, .. } => Some(host),
            Origin::Opaque(_) => None,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Origin::Tuple { port, .. } => Some(*port),
            Origin::Opaque(_) => None,
        }
    }

    /// Registrable-domain reduction of this origin.
    ///
    /// Opaque origins have no site.
    pub fn site(&self) -> Option<Site> {
        match self {
            Origin::Tuple { scheme, host, .. } => Some(Site::new(scheme, registrable_domain(host))),
            Origin::Opaque(_) => None,
        }
    }

    /// Check whether two origins belong to the same site
    pub fn is_same_site(&self, other: &Origin) -> bool {
        match (self.site(), other.site()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Secure-context check used to gate header-based isolation requests
    pub fn is_potentially_trustworthy(&self) -> bool {
        let Origin::Tuple { scheme, host, .. } = self else {
            return false;
        };
        if scheme == "https" || scheme == "wss" {
            return true;
        }
        if host == "localhost" || host.ends_with(".localhost") {
            return true;
        }
        host.trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }
}

/// Default port for the schemes we serialize without an explicit port
fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        "ftp" => Some(21),
        _ => None,
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Tuple { scheme, host, port } => {
                if default_port(scheme) == Some(*port) {
                    write!(f, "{}://{}", scheme, host)
                } else {
                    write!(f, "{}://{}:{}", scheme, host, port)
                }
            }
            Origin::Opaque(_) => write!(f, "null"),
        }
    }
}
