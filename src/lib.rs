//! # sitelock - site and origin isolation for multi-process browsers
//!
//! Decides, for every navigation, which renderer process may host a
//! document and which data that process may later ask for.
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - **origin**: origins, sites and isolated origin patterns
//! - **security**: the isolated origin registry and its per-profile store
//! - **browsing**: browsing groups and the decisions pinned in them
//! - **navigation**: response headers, isolation triggers, the resolver
//!   and the per-navigation state machine
//! - **process**: process locks, the allocator and storage IPC checks
//! - **engine**: the facade tying everything together
//! - **config**: command-line and JSON configuration
//! - **devtools**: diagnostic console and Origin-Agent-Cluster counters
//! - **utils**: shared utilities and error types

pub mod browsing;
pub mod config;
pub mod devtools;
pub mod engine;
pub mod navigation;
pub mod origin;
pub mod process;
pub mod security;
pub mod utils;

// Re-export main types for convenience
pub use browsing::{BrowsingGroupId, IsolationContext, ProfileId};
pub use config::IsolationConfig;
pub use engine::IsolationEngine;
pub use utils::error::{Result, SiteLockError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = "sitelock";
