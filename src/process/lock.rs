//! Process locks and the site information they are computed from

use std::fmt;

use crate::origin::{Origin, Site};

/// Granularity at which a lock matches destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IsolationGranularity {
    SiteKeyed,
    OriginKeyed,
}

/// What a lock is pinned to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockScope {
    /// Shared process that may host any site not requiring isolation
    AnySite,
    Site(Site),
    Origin(Origin),
}

/// Everything downstream consumers need to know about a destination
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SiteInfo {
    /// The origin the document will commit with
    pub origin: Origin,
    /// Site the destination is grouped under. For isolated origins this is
    /// the isolated origin's host rather than its registrable domain.
    pub site: Option<Site>,
    pub is_origin_keyed: bool,
    pub requires_dedicated_process: bool,
    /// COOP + COEP cross-origin isolation
    pub cross_origin_isolated: bool,
}

impl SiteInfo {
    /// Site info for a destination that needs no isolation
    pub fn shared(origin: Origin) -> Self {
        let site = origin.site();
        Self {
            origin,
            site,
            is_origin_keyed: false,
            requires_dedicated_process: false,
            cross_origin_isolated: false,
        }
    }

    pub fn granularity(&self) -> Option<IsolationGranularity> {
        if !self.requires_dedicated_process {
            None
        } else if self.is_origin_keyed {
            Some(IsolationGranularity::OriginKeyed)
        } else {
            Some(IsolationGranularity::SiteKeyed)
        }
    }

    /// The lock a process must carry to host this destination
    pub fn lock(&self) -> ProcessLock {
        let scope = match (self.granularity(), &self.site) {
            (Some(IsolationGranularity::OriginKeyed), _) => LockScope::Origin(self.origin.clone()),
            (Some(IsolationGranularity::SiteKeyed), Some(site)) => LockScope::Site(site.clone()),
            _ => LockScope::AnySite,
        };
        ProcessLock {
            scope,
            cross_origin_isolated: self.cross_origin_isolated,
        }
    }
}

/// Immutable descriptor of what a process may host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessLock {
    scope: LockScope,
    cross_origin_isolated: bool,
}

impl ProcessLock {
    /// Lock of a fresh, unused process
    pub fn allow_any_site() -> Self {
        Self {
            scope: LockScope::AnySite,
            cross_origin_isolated: false,
        }
    }

    pub fn for_site(site: Site) -> Self {
        Self {
            scope: LockScope::Site(site),
            cross_origin_isolated: false,
        }
    }

    pub fn for_origin(origin: Origin) -> Self {
        Self {
            scope: LockScope::Origin(origin),
            cross_origin_isolated: false,
        }
    }

    pub fn with_cross_origin_isolated(mut self, isolated: bool) -> Self {
        self.cross_origin_isolated = isolated;
        self
    }

    pub fn scope(&self) -> &LockScope {
        &self.scope
    }

    pub fn granularity(&self) -> Option<IsolationGranularity> {
        match self.scope {
            LockScope::AnySite => None,
            LockScope::Site(_) => Some(IsolationGranularity::SiteKeyed),
            LockScope::Origin(_) => Some(IsolationGranularity::OriginKeyed),
        }
    }

    pub fn allows_any_site(&self) -> bool {
        self.scope == LockScope::AnySite
    }

    pub fn is_cross_origin_isolated(&self) -> bool {
        self.cross_origin_isolated
    }

    pub fn locked_site(&self) -> Option<&Site> {
        match &self.scope {
            LockScope::Site(site) => Some(site),
            _ => None,
        }
    }

    pub fn locked_origin(&self) -> Option<&Origin> {
        match &self.scope {
            LockScope::Origin(origin) => Some(origin),
            _ => None,
        }
    }

    /// Whether a process carrying this lock may host the destination
    pub fn is_suitable_for(&self, info: &SiteInfo) -> bool {
        self.admits(info) && self.cross_origin_isolated == info.cross_origin_isolated
    }

    /// Origin admission, ignoring cross-origin isolation. Used for data
    /// access checks where only the origin is known.
    pub fn admits(&self, info: &SiteInfo) -> bool {
        if info.origin.is_opaque() {
            return false;
        }
        match &self.scope {
            LockScope::AnySite => !info.requires_dedicated_process,
            LockScope::Site(site) => {
                info.granularity() == Some(IsolationGranularity::SiteKeyed)
                    && info.site.as_ref() == Some(site)
            }
            LockScope::Origin(origin) => {
                info.granularity() == Some(IsolationGranularity::OriginKeyed)
                    && info.origin == *origin
            }
        }
    }

    /// Site component used for legacy "same site URL" grouping
    pub fn site_component(&self) -> Option<Site> {
        match &self.scope {
            LockScope::AnySite => None,
            LockScope::Site(site) => Some(site.clone()),
            LockScope::Origin(origin) => origin.site(),
        }
    }

    /// Compare site components. Locks that agree here are still distinct
    /// scopes unless they are equal.
    pub fn has_same_site_component(&self, other: &ProcessLock) -> bool {
        match (self.site_component(), other.site_component()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ProcessLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            LockScope::AnySite => write!(f, "{{ allows-any-site }}")?,
            LockScope::Site(site) => write!(f, "{{ site: {} }}", site)?,
            LockScope::Origin(origin) => write!(f, "{{ origin: {} }}", origin)?,
        }
        if self.cross_origin_isolated {
            write!(f, " cross-origin-isolated")?;
        }
        Ok(())
    }
}
