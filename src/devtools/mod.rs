//! Developer-facing diagnostics
//!
//! The console collects isolation diagnostics (denied Origin-Agent-Cluster
//! requests, protocol violations) and counts Origin-Agent-Cluster outcomes.

mod console;

pub use console::{Console, ConsoleMessage, LogLevel};
