//! Storage access messages and process termination signals
//!
//! Renderers name the origin whose data they want in every storage
//! message. The browser never trusts that claim; it is checked against the
//! sender's process lock and a mismatch is answered with termination.

use std::fmt;
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender, channel};

use super::ProcessId;
use crate::origin::Origin;

/// Storage and messaging entry points that carry an origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    LocalStorage,
    SessionStorage,
    BroadcastChannel,
    Cookies,
}

impl StorageKind {
    /// Reason reported when a process lies about its origin here
    pub fn bad_message_reason(&self) -> BadMessageReason {
        match self {
            StorageKind::LocalStorage => BadMessageReason::BadOriginForStorageAccess,
            StorageKind::SessionStorage => BadMessageReason::BadOriginForSessionStorage,
            StorageKind::BroadcastChannel => BadMessageReason::BadOriginForBroadcastChannel,
            StorageKind::Cookies => BadMessageReason::BadOriginForCookieAccess,
        }
    }
}

/// A storage access request sent by a renderer process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRequest {
    pub kind: StorageKind,
    pub sender: ProcessId,
    pub origin: Origin,
}

impl StorageRequest {
    pub fn new(kind: StorageKind, sender: ProcessId, origin: Origin) -> Self {
        Self {
            kind,
            sender,
            origin,
        }
    }

    /// `localStorage` open
    pub fn local_storage(sender: ProcessId, origin: Origin) -> Self {
        Self::new(StorageKind::LocalStorage, sender, origin)
    }

    /// `BroadcastChannel` connect
    pub fn broadcast_channel(sender: ProcessId, origin: Origin) -> Self {
        Self::new(StorageKind::BroadcastChannel, sender, origin)
    }
}

/// Structured reason codes for killing a misbehaving process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BadMessageReason {
    BadOriginForStorageAccess,
    BadOriginForSessionStorage,
    BadOriginForBroadcastChannel,
    BadOriginForCookieAccess,
}

impl BadMessageReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BadMessageReason::BadOriginForStorageAccess => "BAD_ORIGIN_FOR_STORAGE_ACCESS",
            BadMessageReason::BadOriginForSessionStorage => "BAD_ORIGIN_FOR_SESSION_STORAGE",
            BadMessageReason::BadOriginForBroadcastChannel => "BAD_ORIGIN_FOR_BROADCAST_CHANNEL",
            BadMessageReason::BadOriginForCookieAccess => "BAD_ORIGIN_FOR_COOKIE_ACCESS",
        }
    }
}

impl fmt::Display for BadMessageReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound hook into the process-management layer
#[cfg_attr(test, mockall::automock)]
pub trait ProcessTerminator: Send + Sync {
    /// Kill `process` immediately. Must not be retried or deferred.
    fn terminate(&self, process: ProcessId, reason: BadMessageReason);
}

/// Termination signal delivered over a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationSignal {
    pub process: ProcessId,
    pub reason: BadMessageReason,
}

/// Terminator that forwards signals to a receiver owned by the process
/// manager
pub struct ChannelTerminator {
    sender: Mutex<Sender<TerminationSignal>>,
}

impl ChannelTerminator {
    /// Create a terminator and the receiving end for the process manager
    pub fn pair() -> (Self, Receiver<TerminationSignal>) {
        let (tx, rx) = channel();
        (
            Self {
                sender: Mutex::new(tx),
            },
            rx,
        )
    }
}

impl ProcessTerminator for ChannelTerminator {
    fn terminate(&self, process: ProcessId, reason: BadMessageReason) {
        let signal = TerminationSignal { process, reason };
        if crate::utils::lock(&self.sender).send(signal).is_err() {
            log::error!("Process manager gone; cannot deliver kill for process {}", process);
        }
    }
}

/// Terminator that only logs; used when no process manager is attached
#[derive(Debug, Default)]
pub struct LoggingTerminator;

impl ProcessTerminator for LoggingTerminator {
    fn terminate(&self, process: ProcessId, reason: BadMessageReason) {
        log::error!("Terminating process {}: {}", process, reason);
    }
}
