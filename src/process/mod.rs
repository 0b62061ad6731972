//! Multi-process architecture for site isolation
//!
//! - Process locks: what a renderer process may host
//! - Allocator: picks or creates a process for a lock
//! - IPC: storage access messages and termination signals

mod allocator;
mod ipc;
mod lock;

pub use allocator::{Assignment, ProcessAllocator, ProcessLimits, ProcessState, RenderProcess};
pub use ipc::{
    BadMessageReason, ChannelTerminator, LoggingTerminator, ProcessTerminator, StorageKind, StorageRequest,
    TerminationSignal,
};
pub use lock::{IsolationGranularity, LockScope, ProcessLock, SiteInfo};

#[cfg(test)]
pub use ipc::MockProcessTerminator;

use std::fmt;

/// Renderer process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
