//! Navigation-time isolation resolver
//!
//! Folds the registry, the group's earlier decisions and the response
//! headers into the [`SiteInfo`] a destination commits with. Resolution
//! is a pure computation over a locked browsing group; recording the
//! result is left to the caller.

use std::fmt;
use std::sync::Arc;

use super::headers::ResponseHeaders;
use super::triggers::Trigger;
use crate::browsing::{BrowsingGroup, Decision, IsolationContext, PinnedDecision};
use crate::config::{IsolationConfig, PinnedOptInPolicy};
use crate::origin::{Origin, OriginPattern, Site};
use crate::process::{IsolationGranularity, SiteInfo};
use crate::security::SecurityPolicy;

/// Outcome of an Origin-Agent-Cluster evaluation, reported to the
/// diagnostic console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OriginAgentClusterEndResult {
    NotRequestedAndNotOriginKeyed,
    NotRequestedButOriginKeyed,
    RequestedButNotOriginKeyed,
    RequestedAndOriginKeyed,
}

impl OriginAgentClusterEndResult {
    pub const ALL: [OriginAgentClusterEndResult; 4] = [
        OriginAgentClusterEndResult::NotRequestedAndNotOriginKeyed,
        OriginAgentClusterEndResult::NotRequestedButOriginKeyed,
        OriginAgentClusterEndResult::RequestedButNotOriginKeyed,
        OriginAgentClusterEndResult::RequestedAndOriginKeyed,
    ];

    pub fn new(requested: bool, origin_keyed: bool) -> Self {
        match (requested, origin_keyed) {
            (false, false) => OriginAgentClusterEndResult::NotRequestedAndNotOriginKeyed,
            (false, true) => OriginAgentClusterEndResult::NotRequestedButOriginKeyed,
            (true, false) => OriginAgentClusterEndResult::RequestedButNotOriginKeyed,
            (true, true) => OriginAgentClusterEndResult::RequestedAndOriginKeyed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OriginAgentClusterEndResult::NotRequestedAndNotOriginKeyed => "NotRequestedAndNotOriginKeyed",
            OriginAgentClusterEndResult::NotRequestedButOriginKeyed => "NotRequestedButOriginKeyed",
            OriginAgentClusterEndResult::RequestedButNotOriginKeyed => "RequestedButNotOriginKeyed",
            OriginAgentClusterEndResult::RequestedAndOriginKeyed => "RequestedAndOriginKeyed",
        }
    }
}

impl fmt::Display for OriginAgentClusterEndResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of resolving one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub site_info: SiteInfo,
    pub pinned: PinnedDecision,
    /// The group had already decided this origin
    pub was_pinned: bool,
    /// The group's site-keyed pin must be replaced by an origin-keyed one
    pub upgrade: bool,
    /// The response asked for origin keying (and was eligible to)
    pub opt_in_requested: bool,
    /// Origin keying was asked for but the group's pin refused it
    pub opt_in_denied: bool,
    pub end_result: OriginAgentClusterEndResult,
    /// Site isolated in the group by this response's COOP
    pub coop_site: Option<Site>,
    /// Whether that COOP site may spread to the profile after a user
    /// activation (false when the site was already isolated)
    pub coop_propagates: bool,
}

/// Computes isolation for destinations
pub struct IsolationResolver {
    policy: Arc<SecurityPolicy>,
    config: IsolationConfig,
}

impl IsolationResolver {
    pub fn new(policy: Arc<SecurityPolicy>, config: IsolationConfig) -> Self {
        Self { policy, config }
    }

    pub fn policy(&self) -> &Arc<SecurityPolicy> {
        &self.policy
    }

    pub fn config(&self) -> &IsolationConfig {
        &self.config
    }

    /// Resolve a destination origin in a browsing group.
    ///
    /// `headers` is `None` before the response arrives; the result is then
    /// provisional. A decision the group already recorded always wins over
    /// anything the headers ask for.
    pub fn resolve(&self, origin: &Origin, headers: Option<&ResponseHeaders>, group: &BrowsingGroup) -> Resolution {
        self.resolve_with(origin, headers, group, true)
    }

    /// Like [`resolve`](Self::resolve), but an opt-in on a site-keyed pin
    /// is always denied. Used while a live process still hosts the origin
    /// under its site lock.
    pub fn resolve_without_upgrade(
        &self,
        origin: &Origin,
        headers: Option<&ResponseHeaders>,
        group: &BrowsingGroup,
    ) -> Resolution {
        self.resolve_with(origin, headers, group, false)
    }

    fn resolve_with(
        &self,
        origin: &Origin,
        headers: Option<&ResponseHeaders>,
        group: &BrowsingGroup,
        allow_upgrade: bool,
    ) -> Resolution {
        let cross_origin_isolated = headers.is_some_and(ResponseHeaders::is_cross_origin_isolated);
        let opt_in_requested = self.opt_in_requested(origin, headers);

        let context = group.context();
        if let Some(existing) = group.pinned(origin) {
            return self.resolve_pinned(
                origin,
                &context,
                existing.clone(),
                opt_in_requested,
                cross_origin_isolated,
                allow_upgrade,
            );
        }

        let mut triggers = Vec::new();
        let static_trigger = self.static_trigger(origin, &context);
        let statically_isolated = static_trigger.is_some();
        triggers.extend(static_trigger);

        let remembered = !opt_in_requested
            && self.config.origin_agent_cluster
            && self.config.honor_opt_in_history
            && self.policy.has_requested_opt_in(origin, context.profile);
        if opt_in_requested || remembered {
            triggers.push(Trigger::OriginAgentCluster {
                process_isolation: self.config.origin_agent_cluster_process_isolation,
            });
        }

        let mut coop_site = None;
        if let Some(site) = origin.site() {
            let coop_requested = self.config.coop_isolation
                && origin.is_potentially_trustworthy()
                && headers.is_some_and(|h| h.coop.requests_isolation());
            if coop_requested {
                coop_site = Some(site.clone());
            }
            if coop_requested || group.is_coop_isolated(&site) {
                triggers.push(Trigger::Coop { site });
            }
        }

        let decision = Trigger::combine(&triggers);
        let pinned = PinnedDecision {
            decision,
            site: Trigger::isolation_site(&triggers).cloned().or_else(|| origin.site()),
        };
        let end_result = self.end_result(origin, &context, opt_in_requested, &decision);

        Resolution {
            site_info: site_info(origin, &pinned, cross_origin_isolated),
            pinned,
            was_pinned: false,
            upgrade: false,
            opt_in_requested,
            opt_in_denied: false,
            end_result,
            coop_propagates: coop_site.is_some() && !statically_isolated,
            coop_site,
        }
    }

    fn resolve_pinned(
        &self,
        origin: &Origin,
        context: &IsolationContext,
        mut pinned: PinnedDecision,
        opt_in_requested: bool,
        cross_origin_isolated: bool,
        allow_upgrade: bool,
    ) -> Resolution {
        let mut upgrade = false;
        let mut opt_in_denied = false;

        if opt_in_requested && !pinned.decision.is_origin_keyed() {
            let site_keyed = pinned.decision == Decision::RequiresIsolation(IsolationGranularity::SiteKeyed);
            if site_keyed && allow_upgrade && self.config.pinned_opt_in_policy == PinnedOptInPolicy::Upgrade {
                pinned.decision = Decision::RequiresIsolation(IsolationGranularity::OriginKeyed);
                upgrade = true;
            } else {
                opt_in_denied = true;
            }
        }

        Resolution {
            site_info: site_info(origin, &pinned, cross_origin_isolated),
            end_result: self.end_result(origin, context, opt_in_requested, &pinned.decision),
            pinned,
            was_pinned: true,
            upgrade,
            opt_in_requested,
            opt_in_denied,
            coop_site: None,
            coop_propagates: false,
        }
    }

    /// End result as seen by Origin-Agent-Cluster. Origin keying that comes
    /// only from a wildcard registry entry is not the header's doing.
    fn end_result(
        &self,
        origin: &Origin,
        context: &IsolationContext,
        opt_in_requested: bool,
        decision: &Decision,
    ) -> OriginAgentClusterEndResult {
        let statically_origin_keyed = matches!(
            self.static_trigger(origin, context),
            Some(Trigger::Static {
                granularity: IsolationGranularity::OriginKeyed,
                ..
            })
        );
        let keyed_by_agent_cluster = decision.is_origin_keyed() && (opt_in_requested || !statically_origin_keyed);
        OriginAgentClusterEndResult::new(opt_in_requested, keyed_by_agent_cluster)
    }

    /// `Origin-Agent-Cluster: ?1` from a secure context, with the feature on
    fn opt_in_requested(&self, origin: &Origin, headers: Option<&ResponseHeaders>) -> bool {
        let Some(headers) = headers else {
            return false;
        };
        if !self.config.origin_agent_cluster || !headers.requests_origin_agent_cluster() {
            return false;
        }
        if !origin.is_potentially_trustworthy() {
            log::debug!("Ignoring Origin-Agent-Cluster from non-secure origin {}", origin);
            return false;
        }
        true
    }

    /// Registry match, or strict site isolation
    fn static_trigger(&self, origin: &Origin, context: &IsolationContext) -> Option<Trigger> {
        let site = origin.site()?;
        match self.policy.matching_pattern(origin, context) {
            Some(OriginPattern::Exact(isolated)) => Some(Trigger::Static {
                granularity: IsolationGranularity::SiteKeyed,
                site: Site::new(isolated.scheme()?, isolated.host()?),
            }),
            Some(OriginPattern::Subdomains { .. }) => Some(Trigger::Static {
                granularity: IsolationGranularity::OriginKeyed,
                site,
            }),
            Some(OriginPattern::Site(isolated_site)) => Some(Trigger::Static {
                granularity: IsolationGranularity::SiteKeyed,
                site: isolated_site,
            }),
            None if self.config.site_per_process => Some(Trigger::Static {
                granularity: IsolationGranularity::SiteKeyed,
                site,
            }),
            None => None,
        }
    }
}

fn site_info(origin: &Origin, pinned: &PinnedDecision, cross_origin_isolated: bool) -> SiteInfo {
    SiteInfo {
        origin: origin.clone(),
        site: pinned.site.clone(),
        is_origin_keyed: pinned.decision.is_origin_keyed(),
        requires_dedicated_process: pinned.decision.requires_dedicated_process(),
        cross_origin_isolated,
    }
}
