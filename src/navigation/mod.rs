//! Navigation-time isolation
//!
//! - Headers: the response metadata isolation depends on
//! - Triggers: independent reasons to isolate, and how they combine
//! - Resolver: turns a destination into a [`SiteInfo`](crate::process::SiteInfo)
//! - Request: per-navigation state machine

mod headers;
mod request;
mod resolver;
mod triggers;

pub use headers::{CrossOriginEmbedderPolicy, CrossOriginOpenerPolicy, ResponseHeaders};
pub use request::{NavigationParams, NavigationRequest};
pub use resolver::{IsolationResolver, OriginAgentClusterEndResult, Resolution};
pub use triggers::Trigger;

use std::fmt;

/// Navigation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NavigationId(pub u64);

impl fmt::Display for NavigationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frame a navigation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    MainFrame,
    Subframe,
}

/// Lifecycle of a navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigationState {
    NotStarted,
    IsolationQueried,
    LockComputed,
    ProcessAssigned,
    Committed,
    Cancelled,
}

impl NavigationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NavigationState::NotStarted => "not started",
            NavigationState::IsolationQueried => "isolation queried",
            NavigationState::LockComputed => "lock computed",
            NavigationState::ProcessAssigned => "process assigned",
            NavigationState::Committed => "committed",
            NavigationState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NavigationState::Committed | NavigationState::Cancelled)
    }
}

impl fmt::Display for NavigationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
