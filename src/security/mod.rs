//! Security policy registry for site and origin isolation
//!
//! Holds, per profile, the set of origins that must live in dedicated
//! processes and the bookkeeping of origins that asked for isolation:
//! - Static entries from the command line, field trials and enterprise policy
//! - Runtime entries triggered by response headers or COOP
//! - Durable per-profile state (see [`store`])

mod policy;
pub mod store;

pub use policy::SecurityPolicy;
pub use store::ProfileStore;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::browsing::BrowsingGroupId;
use crate::origin::OriginPattern;

/// Where an isolated origin entry came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolatedOriginSource {
    CommandLine,
    FieldTrial,
    EnterprisePolicy,
    /// Added at runtime because a response carried the named header
    WebTriggered { header: String },
    /// Added after a user activation on a COOP document
    Coop,
}

impl IsolatedOriginSource {
    /// Entries from these sources survive restarts of their profile
    pub fn is_durable(&self) -> bool {
        matches!(self, IsolatedOriginSource::WebTriggered { .. } | IsolatedOriginSource::Coop)
    }

    /// Entries from these sources are ignored while site isolation trials
    /// are disabled
    pub fn is_suppressed_by_trial_opt_out(&self) -> bool {
        matches!(self, IsolatedOriginSource::FieldTrial)
    }
}

impl fmt::Display for IsolatedOriginSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolatedOriginSource::CommandLine => write!(f, "command line"),
            IsolatedOriginSource::FieldTrial => write!(f, "field trial"),
            IsolatedOriginSource::EnterprisePolicy => write!(f, "enterprise policy"),
            IsolatedOriginSource::WebTriggered { header } => write!(f, "web-triggered ({})", header),
            IsolatedOriginSource::Coop => write!(f, "COOP"),
        }
    }
}

/// One entry of the isolated origin registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IsolatedOriginEntry {
    pub pattern: OriginPattern,
    pub source: IsolatedOriginSource,
    /// First browsing group the entry applies to; groups created before
    /// the entry was added keep their earlier view
    pub min_group: BrowsingGroupId,
}
