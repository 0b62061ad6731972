//! Response headers that affect isolation

/// `Cross-Origin-Opener-Policy` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CrossOriginOpenerPolicy {
    #[default]
    UnsafeNone,
    SameOriginAllowPopups,
    SameOrigin,
    RestrictProperties,
}

impl CrossOriginOpenerPolicy {
    /// Parse a header value. Parameters such as `report-to` are ignored
    /// and unknown values fall back to `unsafe-none`.
    pub fn parse(value: &str) -> Self {
        let token = value.split(';').next().unwrap_or("").trim();
        match token.to_ascii_lowercase().as_str() {
            "same-origin" => CrossOriginOpenerPolicy::SameOrigin,
            "same-origin-allow-popups" => CrossOriginOpenerPolicy::SameOriginAllowPopups,
            "restrict-properties" => CrossOriginOpenerPolicy::RestrictProperties,
            _ => CrossOriginOpenerPolicy::UnsafeNone,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CrossOriginOpenerPolicy::UnsafeNone => "unsafe-none",
            CrossOriginOpenerPolicy::SameOriginAllowPopups => "same-origin-allow-popups",
            CrossOriginOpenerPolicy::SameOrigin => "same-origin",
            CrossOriginOpenerPolicy::RestrictProperties => "restrict-properties",
        }
    }

    /// Anything stronger than `unsafe-none` asks for site isolation
    pub fn requests_isolation(&self) -> bool {
        *self != CrossOriginOpenerPolicy::UnsafeNone
    }
}

/// `Cross-Origin-Embedder-Policy` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CrossOriginEmbedderPolicy {
    #[default]
    UnsafeNone,
    RequireCorp,
    Credentialless,
}

impl CrossOriginEmbedderPolicy {
    pub fn parse(value: &str) -> Self {
        let token = value.split(';').next().unwrap_or("").trim();
        match token.to_ascii_lowercase().as_str() {
            "require-corp" => CrossOriginEmbedderPolicy::RequireCorp,
            "credentialless" => CrossOriginEmbedderPolicy::Credentialless,
            _ => CrossOriginEmbedderPolicy::UnsafeNone,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CrossOriginEmbedderPolicy::UnsafeNone => "unsafe-none",
            CrossOriginEmbedderPolicy::RequireCorp => "require-corp",
            CrossOriginEmbedderPolicy::Credentialless => "credentialless",
        }
    }
}

/// The parts of a navigation response the resolver looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResponseHeaders {
    /// `Origin-Agent-Cluster`: `Some(true)` for `?1`, `Some(false)` for `?0`
    pub origin_agent_cluster: Option<bool>,
    pub coop: CrossOriginOpenerPolicy,
    pub coep: CrossOriginEmbedderPolicy,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the relevant headers out of a raw name/value list. Header
    /// names are case-insensitive; the first occurrence of each wins.
    pub fn from_headers<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut parsed = Self::default();
        let (mut seen_oac, mut seen_coop, mut seen_coep) = (false, false, false);

        for (name, value) in headers {
            match name.trim().to_ascii_lowercase().as_str() {
                "origin-agent-cluster" if !seen_oac => {
                    seen_oac = true;
                    parsed.origin_agent_cluster = parse_structured_boolean(value);
                    if parsed.origin_agent_cluster.is_none() {
                        log::debug!("Ignoring malformed Origin-Agent-Cluster value {:?}", value);
                    }
                }
                "cross-origin-opener-policy" if !seen_coop => {
                    seen_coop = true;
                    parsed.coop = CrossOriginOpenerPolicy::parse(value);
                }
                "cross-origin-embedder-policy" if !seen_coep => {
                    seen_coep = true;
                    parsed.coep = CrossOriginEmbedderPolicy::parse(value);
                }
                _ => {}
            }
        }
        parsed
    }

    pub fn with_origin_agent_cluster(mut self, requested: bool) -> Self {
        self.origin_agent_cluster = Some(requested);
        self
    }

    pub fn with_coop(mut self, coop: CrossOriginOpenerPolicy) -> Self {
        self.coop = coop;
        self
    }

    pub fn with_coep(mut self, coep: CrossOriginEmbedderPolicy) -> Self {
        self.coep = coep;
        self
    }

    /// `Origin-Agent-Cluster: ?1`
    pub fn requests_origin_agent_cluster(&self) -> bool {
        self.origin_agent_cluster == Some(true)
    }

    /// COOP `same-origin` together with a COEP other than `unsafe-none`
    pub fn is_cross_origin_isolated(&self) -> bool {
        self.coop == CrossOriginOpenerPolicy::SameOrigin && self.coep != CrossOriginEmbedderPolicy::UnsafeNone
    }
}

/// Structured-field boolean (`?1` / `?0`)
fn parse_structured_boolean(value: &str) -> Option<bool> {
    match value.trim() {
        "?1" => Some(true),
        "?0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_agent_cluster_parsing() {
        let on = ResponseHeaders::from_headers([("Origin-Agent-Cluster", "?1")]);
        assert!(on.requests_origin_agent_cluster());

        let off = ResponseHeaders::from_headers([("origin-agent-cluster", " ?0 ")]);
        assert_eq!(off.origin_agent_cluster, Some(false));

        let bad = ResponseHeaders::from_headers([("Origin-Agent-Cluster", "1")]);
        assert_eq!(bad.origin_agent_cluster, None);
    }

    #[test]
    fn test_first_header_wins() {
        let headers = ResponseHeaders::from_headers([
            ("Origin-Agent-Cluster", "?1"),
            ("Origin-Agent-Cluster", "?0"),
        ]);
        assert!(headers.requests_origin_agent_cluster());
    }

    #[test]
    fn test_coop_parsing() {
        assert_eq!(
            CrossOriginOpenerPolicy::parse("same-origin; report-to=\"endpoint\""),
            CrossOriginOpenerPolicy::SameOrigin
        );
        assert_eq!(
            CrossOriginOpenerPolicy::parse("same-origin-allow-popups"),
            CrossOriginOpenerPolicy::SameOriginAllowPopups
        );
        assert_eq!(CrossOriginOpenerPolicy::parse("bogus"), CrossOriginOpenerPolicy::UnsafeNone);
        assert!(!CrossOriginOpenerPolicy::UnsafeNone.requests_isolation());
        assert!(CrossOriginOpenerPolicy::RestrictProperties.requests_isolation());
    }

    #[test]
    fn test_cross_origin_isolation() {
        let headers = ResponseHeaders::from_headers([
            ("Cross-Origin-Opener-Policy", "same-origin"),
            ("Cross-Origin-Embedder-Policy", "require-corp"),
        ]);
        assert!(headers.is_cross_origin_isolated());

        let popups = headers.with_coop(CrossOriginOpenerPolicy::SameOriginAllowPopups);
        assert!(!popups.is_cross_origin_isolated());

        let no_coep = ResponseHeaders::new().with_coop(CrossOriginOpenerPolicy::SameOrigin);
        assert!(!no_coep.is_cross_origin_isolated());
    }
}
