//! Browsing groups: the scope at which isolation decisions are pinned
//!
//! A browsing group is a set of mutually scriptable browsing contexts.
//! Once a group has decided whether an origin is isolated, every later
//! document of that origin in the group gets the same answer.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use crate::navigation::NavigationId;
use crate::origin::{Origin, Site};
use crate::process::IsolationGranularity;
use crate::utils::{self, PolicyError, Result, SiteLockError};

/// Browsing group identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BrowsingGroupId(pub u64);

impl fmt::Display for BrowsingGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Profile identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProfileId(pub u32);

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scope of every policy query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IsolationContext {
    pub group: BrowsingGroupId,
    pub profile: ProfileId,
}

impl IsolationContext {
    pub fn new(group: BrowsingGroupId, profile: ProfileId) -> Self {
        Self { group, profile }
    }
}

/// Whether an origin is isolated within a browsing group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// Needs a dedicated process at the given granularity
    RequiresIsolation(IsolationGranularity),
    /// Origin-keyed agent cluster hosted in a shared process
    OriginKeyedWithoutIsolation,
    DoesNotRequireIsolation,
}

impl Decision {
    pub fn is_origin_keyed(&self) -> bool {
        matches!(
            self,
            Decision::RequiresIsolation(IsolationGranularity::OriginKeyed) | Decision::OriginKeyedWithoutIsolation
        )
    }

    pub fn requires_dedicated_process(&self) -> bool {
        matches!(self, Decision::RequiresIsolation(_))
    }

    pub fn granularity(&self) -> Option<IsolationGranularity> {
        match self {
            Decision::RequiresIsolation(granularity) => Some(*granularity),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::RequiresIsolation(IsolationGranularity::SiteKeyed) => "site-keyed",
            Decision::RequiresIsolation(IsolationGranularity::OriginKeyed) => "origin-keyed",
            Decision::OriginKeyedWithoutIsolation => "origin-keyed (shared process)",
            Decision::DoesNotRequireIsolation => "not isolated",
        }
    }
}

/// A recorded decision together with the site the origin is grouped under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PinnedDecision {
    pub decision: Decision,
    pub site: Option<Site>,
}

/// One browsing group's isolation state
#[derive(Debug)]
pub struct BrowsingGroup {
    id: BrowsingGroupId,
    profile: ProfileId,
    /// Decisions of committed documents
    committed: HashMap<Origin, PinnedDecision>,
    /// Decisions of navigations that have a response but have not committed
    pending: HashMap<NavigationId, (Origin, PinnedDecision)>,
    /// Sites isolated in this group because of COOP
    coop_sites: BTreeSet<Site>,
    /// COOP sites of navigations that have not committed yet
    pending_coop: HashMap<NavigationId, (Site, bool)>,
    /// COOP sites waiting for a user activation before they spread to
    /// other groups of the profile
    awaiting_activation: BTreeSet<Site>,
}

impl BrowsingGroup {
    pub fn new(id: BrowsingGroupId, profile: ProfileId) -> Self {
        Self {
            id,
            profile,
            committed: HashMap::new(),
            pending: HashMap::new(),
            coop_sites: BTreeSet::new(),
            pending_coop: HashMap::new(),
            awaiting_activation: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> BrowsingGroupId {
        self.id
    }

    pub fn profile(&self) -> ProfileId {
        self.profile
    }

    pub fn context(&self) -> IsolationContext {
        IsolationContext::new(self.id, self.profile)
    }

    /// Recorded decision for an origin: a committed document first, then
    /// any navigation still waiting to commit
    pub fn pinned(&self, origin: &Origin) -> Option<&PinnedDecision> {
        self.committed.get(origin).or_else(|| {
            self.pending
                .values()
                .find(|(pending_origin, _)| pending_origin == origin)
                .map(|(_, pinned)| pinned)
        })
    }

    pub fn decision_for(&self, origin: &Origin) -> Option<Decision> {
        self.pinned(origin).map(|pinned| pinned.decision)
    }

    /// Record the decision a navigation's response produced. An origin
    /// already pinned in this group must keep its decision.
    pub fn record_pending(&mut self, navigation: NavigationId, origin: Origin, pinned: PinnedDecision) -> Result<()> {
        if let Some(existing) = self.pinned(&origin) {
            if existing.decision != pinned.decision {
                debug_assert!(false, "conflicting decisions for {} in group {}", origin, self.id);
                return Err(SiteLockError::ConsistencyViolation(format!(
                    "{} is {} in group {}, not {}",
                    origin,
                    existing.decision.as_str(),
                    self.id,
                    pinned.decision.as_str()
                )));
            }
        }
        log::debug!("Group {}: {} is {}", self.id, origin, pinned.decision.as_str());
        self.pending.insert(navigation, (origin, pinned));
        Ok(())
    }

    /// Move a navigation's pending decision into the committed snapshot
    pub fn commit(&mut self, navigation: NavigationId) -> Result<Option<PinnedDecision>> {
        if let Some((site, propagate)) = self.pending_coop.remove(&navigation) {
            self.add_coop_site(site, propagate);
        }
        let Some((origin, pinned)) = self.pending.remove(&navigation) else {
            return Ok(None);
        };
        if let Some(existing) = self.committed.get(&origin) {
            if existing.decision != pinned.decision {
                debug_assert!(false, "frame tree and pending commit disagree about {}", origin);
                return Err(SiteLockError::ConsistencyViolation(format!(
                    "committed {} disagrees with pending commit in group {}",
                    origin, self.id
                )));
            }
            return Ok(Some(pinned));
        }
        self.committed.insert(origin, pinned.clone());
        Ok(Some(pinned))
    }

    /// Record a decision directly in the committed snapshot, keeping any
    /// decision already there
    pub fn pin(&mut self, origin: Origin, pinned: PinnedDecision) -> Decision {
        if let Some(existing) = self.pinned(&origin) {
            return existing.decision;
        }
        log::debug!("Group {}: {} is {}", self.id, origin, pinned.decision.as_str());
        let decision = pinned.decision;
        self.committed.insert(origin, pinned);
        decision
    }

    /// Forget a cancelled navigation's pending decision
    pub fn cancel(&mut self, navigation: NavigationId) {
        self.pending_coop.remove(&navigation);
        if let Some((origin, _)) = self.pending.remove(&navigation) {
            log::debug!("Group {}: dropped pending decision for {}", self.id, origin);
        }
    }

    /// Replace a site-keyed pin with an origin-keyed one, everywhere the
    /// origin occurs in this group
    pub fn upgrade_to_origin_keyed(&mut self, origin: &Origin) {
        let upgraded = Decision::RequiresIsolation(IsolationGranularity::OriginKeyed);
        if let Some(pinned) = self.committed.get_mut(origin) {
            pinned.decision = upgraded;
        }
        for (pending_origin, pinned) in self.pending.values_mut() {
            if pending_origin == origin {
                pinned.decision = upgraded;
            }
        }
        log::warn!("Group {}: upgraded {} to origin-keyed isolation", self.id, origin);
    }

    /// Isolate a site in this group because a document sent COOP
    pub fn add_coop_site(&mut self, site: Site, propagate_on_activation: bool) {
        if propagate_on_activation {
            self.awaiting_activation.insert(site.clone());
        }
        self.coop_sites.insert(site);
    }

    /// COOP site isolation that takes effect when `navigation` commits
    pub fn add_pending_coop_site(&mut self, navigation: NavigationId, site: Site, propagate_on_activation: bool) {
        self.pending_coop.insert(navigation, (site, propagate_on_activation));
    }

    /// Whether a committed or pending COOP response isolated the site here
    pub fn is_coop_isolated(&self, site: &Site) -> bool {
        self.coop_sites.contains(site) || self.pending_coop.values().any(|(pending, _)| pending == site)
    }

    /// Sites that a user activation should now propagate to the profile
    pub fn take_awaiting_activation(&mut self) -> BTreeSet<Site> {
        std::mem::take(&mut self.awaiting_activation)
    }

    pub fn committed_origins(&self) -> impl Iterator<Item = &Origin> {
        self.committed.keys()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Arena of browsing groups; each group is locked independently
#[derive(Default)]
pub struct BrowsingGroups {
    groups: RwLock<HashMap<BrowsingGroupId, Arc<Mutex<BrowsingGroup>>>>,
}

impl BrowsingGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, group: BrowsingGroup) {
        let id = group.id();
        utils::write(&self.groups).insert(id, Arc::new(Mutex::new(group)));
    }

    pub fn get(&self, id: BrowsingGroupId) -> Result<Arc<Mutex<BrowsingGroup>>> {
        utils::read(&self.groups)
            .get(&id)
            .cloned()
            .ok_or_else(|| PolicyError::UnknownBrowsingGroup(id).into())
    }

    pub fn remove(&self, id: BrowsingGroupId) -> Option<Arc<Mutex<BrowsingGroup>>> {
        utils::write(&self.groups).remove(&id)
    }

    pub fn contains(&self, id: BrowsingGroupId) -> bool {
        utils::read(&self.groups).contains_key(&id)
    }

    pub fn len(&self) -> usize {
        utils::read(&self.groups).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of the live groups in a profile
    pub fn ids_for_profile(&self, profile: ProfileId) -> Vec<BrowsingGroupId> {
        let groups = utils::read(&self.groups);
        let mut ids: Vec<_> = groups
            .iter()
            .filter(|(_, group)| utils::lock(group).profile() == profile)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }
}
