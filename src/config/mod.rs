//! Engine configuration
//!
//! Loaded from a JSON file or from Chromium-style command-line switches.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::process::ProcessLimits;
use crate::utils::Result;

/// What to do when an origin asks for origin keying in a browsing group
/// that already pinned it site-keyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinnedOptInPolicy {
    /// Keep the site-keyed decision and emit a diagnostic
    #[default]
    Deny,
    /// Re-pin the origin as origin-keyed across the group
    Upgrade,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationConfig {
    /// `--isolate-origins`
    #[serde(default)]
    pub isolated_origins: Vec<String>,

    /// Origins isolated by field trial; ignored while trials are disabled
    #[serde(default)]
    pub field_trial_isolated_origins: Vec<String>,

    #[serde(default)]
    pub enterprise_isolated_origins: Vec<String>,

    /// Every site gets a dedicated process
    #[serde(default)]
    pub site_per_process: bool,

    #[serde(default)]
    pub site_isolation_trials_disabled: bool,

    /// Honor `Origin-Agent-Cluster` at all
    #[serde(default = "default_true")]
    pub origin_agent_cluster: bool,

    /// Give origin-keyed agent clusters their own process
    #[serde(default = "default_true")]
    pub origin_agent_cluster_process_isolation: bool,

    /// Isolate sites that send COOP
    #[serde(default = "default_true")]
    pub coop_isolation: bool,

    /// Origin-key origins that requested it before in the same profile
    #[serde(default = "default_true")]
    pub honor_opt_in_history: bool,

    #[serde(default)]
    pub pinned_opt_in_policy: PinnedOptInPolicy,

    #[serde(default = "default_max_renderer_processes")]
    pub max_renderer_processes: usize,

    #[serde(default = "default_max_documents_per_process")]
    pub max_documents_per_process: usize,

    #[serde(default = "default_max_process_memory_bytes")]
    pub max_process_memory_bytes: usize,

    /// Where durable per-profile state is written; `None` keeps it in
    /// memory only
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            isolated_origins: Vec::new(),
            field_trial_isolated_origins: Vec::new(),
            enterprise_isolated_origins: Vec::new(),
            site_per_process: false,
            site_isolation_trials_disabled: false,
            origin_agent_cluster: true,
            origin_agent_cluster_process_isolation: true,
            coop_isolation: true,
            honor_opt_in_history: true,
            pinned_opt_in_policy: PinnedOptInPolicy::default(),
            max_renderer_processes: default_max_renderer_processes(),
            max_documents_per_process: default_max_documents_per_process(),
            max_process_memory_bytes: default_max_process_memory_bytes(),
            profile_dir: None,
        }
    }
}

impl IsolationConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Apply command-line switches on top of the defaults. Returns the
    /// config and the arguments that were not switches.
    pub fn from_args<I, S>(args: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        let rest = config.apply_args(args);
        (config, rest)
    }

    /// Apply switches to an existing config
    pub fn apply_args<I, S>(&mut self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rest = Vec::new();
        for arg in args {
            let arg = arg.as_ref();
            let (switch, value) = match arg.split_once('=') {
                Some((switch, value)) => (switch, Some(value)),
                None => (arg, None),
            };
            match (switch, value) {
                ("--isolate-origins", Some(list)) => self.isolated_origins.extend(split_list(list)),
                ("--field-trial-isolate-origins", Some(list)) => {
                    self.field_trial_isolated_origins.extend(split_list(list))
                }
                ("--site-per-process", None) => self.site_per_process = true,
                ("--disable-site-isolation-trials", None) => self.site_isolation_trials_disabled = true,
                ("--disable-origin-agent-cluster-isolation", None) => {
                    self.origin_agent_cluster_process_isolation = false
                }
                ("--disable-coop-isolation", None) => self.coop_isolation = false,
                ("--renderer-process-limit", Some(n)) => match n.parse() {
                    Ok(limit) => self.max_renderer_processes = limit,
                    Err(_) => log::warn!("Ignoring invalid renderer process limit {:?}", n),
                },
                ("--profile-dir", Some(dir)) => self.profile_dir = Some(PathBuf::from(dir)),
                _ if arg.starts_with("--") => log::warn!("Unknown switch {}", arg),
                _ => rest.push(arg.to_string()),
            }
        }
        rest
    }

    pub fn process_limits(&self) -> ProcessLimits {
        ProcessLimits {
            max_renderer_processes: self.max_renderer_processes,
            max_documents_per_process: self.max_documents_per_process,
            max_process_memory_bytes: self.max_process_memory_bytes,
        }
    }
}

fn split_list(list: &str) -> impl Iterator<Item = String> + '_ {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
}

fn default_true() -> bool {
    true
}

fn default_max_renderer_processes() -> usize {
    ProcessLimits::default().max_renderer_processes
}

fn default_max_documents_per_process() -> usize {
    ProcessLimits::default().max_documents_per_process
}

fn default_max_process_memory_bytes() -> usize {
    ProcessLimits::default().max_process_memory_bytes
}
