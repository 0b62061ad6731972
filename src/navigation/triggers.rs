//! Independent reasons to isolate a destination

use crate::browsing::Decision;
use crate::origin::Site;
use crate::process::IsolationGranularity;

/// A single reason to isolate a destination
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Registry match or strict site isolation
    Static {
        granularity: IsolationGranularity,
        site: Site,
    },
    /// `Origin-Agent-Cluster: ?1` on the response, or remembered opt-in
    OriginAgentCluster { process_isolation: bool },
    /// COOP stronger than `unsafe-none`
    Coop { site: Site },
}

impl Trigger {
    /// Fold a set of triggers into one decision.
    ///
    /// Origin keying comes from an origin-keyed static match or an
    /// Origin-Agent-Cluster request. A dedicated process is needed for any
    /// static or COOP trigger, and for Origin-Agent-Cluster when process
    /// isolation is enabled for it. The two compound.
    pub fn combine(triggers: &[Trigger]) -> Decision {
        let origin_keyed = triggers.iter().any(|trigger| {
            matches!(
                trigger,
                Trigger::Static {
                    granularity: IsolationGranularity::OriginKeyed,
                    ..
                } | Trigger::OriginAgentCluster { .. }
            )
        });
        let dedicated = triggers.iter().any(|trigger| match trigger {
            Trigger::Static { .. } | Trigger::Coop { .. } => true,
            Trigger::OriginAgentCluster { process_isolation } => *process_isolation,
        });

        match (origin_keyed, dedicated) {
            (true, true) => Decision::RequiresIsolation(IsolationGranularity::OriginKeyed),
            (true, false) => Decision::OriginKeyedWithoutIsolation,
            (false, true) => Decision::RequiresIsolation(IsolationGranularity::SiteKeyed),
            (false, false) => Decision::DoesNotRequireIsolation,
        }
    }

    /// Site a site-keyed decision is locked to: a static match first, then
    /// COOP
    pub fn isolation_site(triggers: &[Trigger]) -> Option<&Site> {
        triggers
            .iter()
            .find_map(|trigger| match trigger {
                Trigger::Static { site, .. } => Some(site),
                _ => None,
            })
            .or_else(|| {
                triggers.iter().find_map(|trigger| match trigger {
                    Trigger::Coop { site } => Some(site),
                    _ => None,
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(host: &str) -> Site {
        Site::new("https", host)
    }

    fn site_keyed(host: &str) -> Trigger {
        Trigger::Static {
            granularity: IsolationGranularity::SiteKeyed,
            site: site(host),
        }
    }

    fn oac(process_isolation: bool) -> Trigger {
        Trigger::OriginAgentCluster { process_isolation }
    }

    #[test]
    fn test_no_triggers() {
        assert_eq!(Trigger::combine(&[]), Decision::DoesNotRequireIsolation);
    }

    #[test]
    fn test_single_triggers() {
        assert_eq!(
            Trigger::combine(&[site_keyed("a.com")]),
            Decision::RequiresIsolation(IsolationGranularity::SiteKeyed)
        );
        assert_eq!(
            Trigger::combine(&[oac(true)]),
            Decision::RequiresIsolation(IsolationGranularity::OriginKeyed)
        );
        assert_eq!(Trigger::combine(&[oac(false)]), Decision::OriginKeyedWithoutIsolation);
        assert_eq!(
            Trigger::combine(&[Trigger::Coop { site: site("b.com") }]),
            Decision::RequiresIsolation(IsolationGranularity::SiteKeyed)
        );
        assert_eq!(
            Trigger::combine(&[Trigger::Static {
                granularity: IsolationGranularity::OriginKeyed,
                site: site("x.a.com"),
            }]),
            Decision::RequiresIsolation(IsolationGranularity::OriginKeyed)
        );
    }

    #[test]
    fn test_triggers_compound() {
        // Origin keying inside an isolated site
        assert_eq!(
            Trigger::combine(&[site_keyed("a.com"), oac(false)]),
            Decision::RequiresIsolation(IsolationGranularity::OriginKeyed)
        );
        assert_eq!(
            Trigger::combine(&[Trigger::Coop { site: site("a.com") }, oac(false)]),
            Decision::RequiresIsolation(IsolationGranularity::OriginKeyed)
        );
        assert_eq!(
            Trigger::combine(&[site_keyed("a.com"), Trigger::Coop { site: site("a.com") }]),
            Decision::RequiresIsolation(IsolationGranularity::SiteKeyed)
        );
    }

    #[test]
    fn test_order_does_not_matter() {
        let triggers = [oac(false), Trigger::Coop { site: site("b.com") }, site_keyed("a.com")];
        let mut reversed = triggers.clone();
        reversed.reverse();
        assert_eq!(Trigger::combine(&triggers), Trigger::combine(&reversed));
    }

    #[test]
    fn test_isolation_site_prefers_static() {
        let triggers = [Trigger::Coop { site: site("b.com") }, site_keyed("isolated.b.com")];
        assert_eq!(Trigger::isolation_site(&triggers), Some(&site("isolated.b.com")));
        assert_eq!(
            Trigger::isolation_site(&[Trigger::Coop { site: site("b.com") }]),
            Some(&site("b.com"))
        );
        assert_eq!(Trigger::isolation_site(&[oac(true)]), None);
    }
}
