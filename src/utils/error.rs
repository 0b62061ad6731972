//! Error types for the sitelock isolation engine

use thiserror::Error;

use crate::browsing::BrowsingGroupId;
use crate::navigation::{NavigationId, NavigationState};
use crate::process::{BadMessageReason, ProcessId};

/// Main error type for isolation engine operations
#[derive(Debug, Error)]
pub enum SiteLockError {
    /// Policy computation errors (bad input to the policy layer)
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),
    /// Navigation lifecycle errors
    #[error("navigation error: {0}")]
    Navigation(#[from] NavigationError),
    /// A process asserted an origin its lock forbids
    #[error("{0}")]
    Protocol(#[from] ProtocolViolation),
    /// Two documents in one browsing group disagreed about an origin
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted state could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while turning caller input into policy values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// Isolated origin pattern could not be parsed
    #[error("invalid origin pattern: {0}")]
    InvalidPattern(String),
    /// Browsing group is unknown or already destroyed
    #[error("unknown browsing group {0}")]
    UnknownBrowsingGroup(BrowsingGroupId),
    /// Process is unknown or already terminated
    #[error("unknown process {0}")]
    UnknownProcess(ProcessId),
}

/// Navigation lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    /// Navigation id is not in flight
    #[error("unknown navigation {0}")]
    UnknownNavigation(NavigationId),
    /// Operation not allowed in the navigation's current state
    #[error("cannot {action} navigation in state {from:?}")]
    InvalidTransition {
        from: NavigationState,
        action: &'static str,
    },
}

/// Fatal protocol violation reported by the storage/IPC gate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("process {process} terminated: {reason}")]
pub struct ProtocolViolation {
    pub process: ProcessId,
    pub reason: BadMessageReason,
}

/// Convenience Result type for sitelock operations
pub type Result<T> = std::result::Result<T, SiteLockError>;
