//! Process allocator: picks or creates renderer processes for locks

use std::collections::{BTreeSet, HashMap};

use super::ProcessId;
use super::lock::{ProcessLock, SiteInfo};
use crate::browsing::{BrowsingGroupId, ProfileId};
use crate::navigation::{FrameKind, NavigationId};
use crate::origin::Origin;
use crate::utils::{PolicyError, Result, SiteLockError};

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Terminated,
}

/// Capacity limits applied when choosing processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    /// Soft limit on live renderer processes; isolation always wins over it
    pub max_renderer_processes: usize,
    pub max_documents_per_process: usize,
    pub max_process_memory_bytes: usize,
}

impl Default for ProcessLimits {
    fn default() -> Self {
        Self {
            max_renderer_processes: 20,
            max_documents_per_process: 64,
            max_process_memory_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// A renderer process as seen by the allocator
#[derive(Debug, Clone)]
pub struct RenderProcess {
    pub id: ProcessId,
    pub profile: ProfileId,
    pub lock: ProcessLock,
    pub is_unused: bool,
    pub state: ProcessState,
    pub hosted_origins: BTreeSet<Origin>,
    /// Browsing groups that committed documents here
    pub groups: BTreeSet<BrowsingGroupId>,
    pub document_count: usize,
    pub memory_usage: usize,
}

impl RenderProcess {
    fn new(id: ProcessId, profile: ProfileId) -> Self {
        Self {
            id,
            profile,
            lock: ProcessLock::allow_any_site(),
            is_unused: true,
            state: ProcessState::Running,
            hosted_origins: BTreeSet::new(),
            groups: BTreeSet::new(),
            document_count: 0,
            memory_usage: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }
}

/// A navigation's provisional hold on a process
#[derive(Debug, Clone)]
struct Claim {
    process: ProcessId,
    lock: ProcessLock,
}

/// Where a navigation ended up after its response arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub process: ProcessId,
    /// The navigation lost its original process and was moved
    pub reassigned: bool,
}

/// Process allocator
pub struct ProcessAllocator {
    processes: HashMap<ProcessId, RenderProcess>,
    claims: HashMap<NavigationId, Claim>,
    next_id: u32,
    limits: ProcessLimits,
}

impl ProcessAllocator {
    /// Create a new allocator
    pub fn new(limits: ProcessLimits) -> Self {
        Self {
            processes: HashMap::new(),
            claims: HashMap::new(),
            next_id: 1,
            limits,
        }
    }

    /// Spawn a fresh, unused process for a profile
    pub fn spawn_unused(&mut self, profile: ProfileId) -> ProcessId {
        let id = ProcessId(self.next_id);
        self.next_id += 1;
        self.processes.insert(id, RenderProcess::new(id, profile));
        log::debug!("Spawned unused renderer process {}", id);
        id
    }

    /// Get process info
    pub fn get_process(&self, id: ProcessId) -> Option<&RenderProcess> {
        self.processes.get(&id)
    }

    /// Number of processes that have not been terminated
    pub fn live_process_count(&self) -> usize {
        self.processes.values().filter(|p| p.is_running()).count()
    }

    /// Process currently claimed by a navigation
    pub fn claimed_process(&self, navigation: NavigationId) -> Option<ProcessId> {
        self.claims.get(&navigation).map(|claim| claim.process)
    }

    /// Whether a live process hosts `origin` for `group` under a
    /// site-keyed lock
    pub fn hosts_under_site_lock(&self, origin: &Origin, group: BrowsingGroupId) -> bool {
        self.processes.values().any(|p| {
            p.is_running()
                && p.lock.locked_site().is_some()
                && p.groups.contains(&group)
                && p.hosted_origins.contains(origin)
        })
    }

    fn is_over_budget(&self, process: &RenderProcess) -> bool {
        process.document_count >= self.limits.max_documents_per_process
            || process.memory_usage > self.limits.max_process_memory_bytes
    }

    /// Whether another in-flight navigation holds `process` for a lock
    /// different from `lock`
    fn has_conflicting_claim(&self, process: ProcessId, navigation: NavigationId, lock: &ProcessLock) -> bool {
        self.claims
            .iter()
            .any(|(id, claim)| *id != navigation && claim.process == process && claim.lock != *lock)
    }

    /// Reuse rule: suitable lock, within budget, no conflicting claim
    fn is_reusable(&self, process: &RenderProcess, navigation: NavigationId, info: &SiteInfo, profile: ProfileId) -> bool {
        if !process.is_running() || process.profile != profile || self.is_over_budget(process) {
            return false;
        }
        if process.is_unused {
            return !self.has_conflicting_claim(process.id, navigation, &info.lock());
        }
        process.lock.is_suitable_for(info)
    }

    /// Pick a process for a destination, spawning one when nothing fits.
    ///
    /// Subframes reuse a process already locked to the destination. Main
    /// frames prefer a fresh process unless the process limit is reached.
    fn select(
        &mut self,
        navigation: NavigationId,
        info: &SiteInfo,
        frame: FrameKind,
        profile: ProfileId,
        exclude: Option<ProcessId>,
    ) -> ProcessId {
        let mut candidates: Vec<&RenderProcess> = self
            .processes
            .values()
            .filter(|p| Some(p.id) != exclude && self.is_reusable(p, navigation, info, profile))
            .collect();
        candidates.sort_by_key(|p| p.id);

        let pinned = candidates.iter().find(|p| !p.is_unused).map(|p| p.id);
        let unused = candidates.iter().find(|p| p.is_unused).map(|p| p.id);
        let at_limit = self.live_process_count() >= self.limits.max_renderer_processes;

        let choice = match frame {
            FrameKind::Subframe => pinned.or(unused),
            FrameKind::MainFrame if at_limit => pinned.or(unused),
            FrameKind::MainFrame => unused,
        };

        choice.unwrap_or_else(|| self.spawn_unused(profile))
    }

    /// Provisionally hold a process for a navigation that has not yet
    /// received its response. An explicitly offered process (the frame's
    /// current one) is used when reusable; otherwise one is selected.
    pub fn claim(
        &mut self,
        navigation: NavigationId,
        info: &SiteInfo,
        frame: FrameKind,
        profile: ProfileId,
        offered: Option<ProcessId>,
    ) -> ProcessId {
        let offered = offered.filter(|id| {
            self.processes
                .get(id)
                .is_some_and(|p| self.is_reusable(p, navigation, info, profile))
        });
        let process = match offered {
            Some(id) => id,
            None => self.select(navigation, info, frame, profile, None),
        };
        self.claims.insert(
            navigation,
            Claim {
                process,
                lock: info.lock(),
            },
        );
        process
    }

    /// Settle a navigation's process once its response is fully received.
    ///
    /// The first response to reach an unused process pins that process's
    /// lock. A navigation whose claimed process is no longer suitable is
    /// moved to another process.
    pub fn pin_on_response(
        &mut self,
        navigation: NavigationId,
        info: &SiteInfo,
        frame: FrameKind,
        profile: ProfileId,
    ) -> Assignment {
        let lock = info.lock();
        let claimed = self.claims.get(&navigation).map(|claim| claim.process);

        let keep = claimed.filter(|id| {
            self.processes.get(id).is_some_and(|p| {
                p.is_running() && p.profile == profile && (p.is_unused || p.lock.is_suitable_for(info))
            })
        });

        let (process, reassigned) = match keep {
            Some(id) => (id, false),
            None => {
                let id = self.select(navigation, info, frame, profile, claimed);
                if let Some(lost) = claimed {
                    log::info!("Navigation {} lost process {}; moved to process {}", navigation, lost, id);
                }
                (id, claimed.is_some())
            }
        };

        if let Some(p) = self.processes.get_mut(&process) {
            if p.is_unused {
                p.lock = lock.clone();
                p.is_unused = false;
                log::debug!("Process {} locked to {}", process, p.lock);
            }
        }
        self.claims.insert(navigation, Claim { process, lock });

        Assignment { process, reassigned }
    }

    /// Record a committed document. Refuses to commit into a process whose
    /// lock does not admit the destination.
    pub fn commit(&mut self, navigation: NavigationId, info: &SiteInfo, group: BrowsingGroupId) -> Result<ProcessId> {
        let claim = self.claims.get(&navigation).cloned().ok_or_else(|| {
            SiteLockError::ConsistencyViolation(format!("navigation {} committed without a process", navigation))
        })?;
        let process = self
            .processes
            .get_mut(&claim.process)
            .filter(|p| p.is_running())
            .ok_or(PolicyError::UnknownProcess(claim.process))?;

        if process.is_unused || !process.lock.is_suitable_for(info) {
            debug_assert!(false, "commit of {} into incompatible process {}", info.origin, process.id);
            return Err(SiteLockError::ConsistencyViolation(format!(
                "{} cannot commit into process {} locked to {}",
                info.origin, process.id, process.lock
            )));
        }

        process.hosted_origins.insert(info.origin.clone());
        process.groups.insert(group);
        process.document_count += 1;
        let id = process.id;
        self.claims.remove(&navigation);
        Ok(id)
    }

    /// Drop a navigation's claim (cancellation)
    pub fn release(&mut self, navigation: NavigationId) {
        self.claims.remove(&navigation);
    }

    /// A document went away
    pub fn detach_document(&mut self, id: ProcessId) {
        if let Some(p) = self.processes.get_mut(&id) {
            p.document_count = p.document_count.saturating_sub(1);
        }
    }

    /// Update process stats
    pub fn update_memory(&mut self, id: ProcessId, memory: usize) {
        if let Some(p) = self.processes.get_mut(&id) {
            p.memory_usage = memory;
        }
    }

    /// Terminate a process
    pub fn terminate(&mut self, id: ProcessId) {
        if let Some(p) = self.processes.get_mut(&id) {
            p.state = ProcessState::Terminated;
            p.document_count = 0;
        }
    }

    /// Clean up terminated processes no navigation still points at
    pub fn cleanup(&mut self) {
        let claimed: BTreeSet<ProcessId> = self.claims.values().map(|c| c.process).collect();
        self.processes
            .retain(|id, p| p.is_running() || claimed.contains(id));
    }
}

impl Default for ProcessAllocator {
    fn default() -> Self {
        Self::new(ProcessLimits::default())
    }
}
