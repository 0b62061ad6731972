//! Isolation engine coordinating all components
//!
//! The IsolationEngine drives a navigation through the isolation pipeline:
//! 1. Resolve the destination against the registry and its browsing group
//! 2. Claim a process for the provisional lock
//! 3. Recompute the lock from the response headers and pin the process
//! 4. Commit, recording the decision in the group
//!
//! It also answers storage access checks and terminates processes that
//! ask for data they must not see.

mod driver;

pub use driver::{NavigationOutcome, NetworkEvent, drive_navigation};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use url::Url;

use crate::browsing::{BrowsingGroup, BrowsingGroupId, BrowsingGroups, IsolationContext, ProfileId};
use crate::config::IsolationConfig;
use crate::devtools::Console;
use crate::navigation::{
    IsolationResolver, NavigationId, NavigationParams, NavigationRequest, NavigationState, Resolution, ResponseHeaders,
};
use crate::origin::{Origin, OriginPattern};
use crate::process::{
    Assignment, LoggingTerminator, ProcessAllocator, ProcessId, ProcessLock, ProcessTerminator, RenderProcess, SiteInfo,
    StorageRequest,
};
use crate::security::{IsolatedOriginSource, ProfileStore, SecurityPolicy};
use crate::utils::{self, NavigationError, PolicyError, ProtocolViolation, Result, SiteLockError};

/// The site isolation engine
pub struct IsolationEngine {
    policy: Arc<SecurityPolicy>,
    resolver: IsolationResolver,
    groups: BrowsingGroups,
    allocator: Mutex<ProcessAllocator>,
    navigations: Mutex<HashMap<NavigationId, NavigationRequest>>,
    loaded_profiles: Mutex<HashSet<ProfileId>>,
    terminator: Arc<dyn ProcessTerminator>,
    console: Arc<Mutex<Console>>,
}

impl IsolationEngine {
    /// Create an engine that only logs process terminations
    pub fn new(config: IsolationConfig) -> Result<Self> {
        Self::with_terminator(config, Arc::new(LoggingTerminator))
    }

    /// Create an engine reporting terminations to the process manager
    pub fn with_terminator(config: IsolationConfig, terminator: Arc<dyn ProcessTerminator>) -> Result<Self> {
        let policy = match &config.profile_dir {
            Some(dir) => SecurityPolicy::with_store(ProfileStore::new(dir)),
            None => SecurityPolicy::new(),
        };
        policy.set_site_isolation_trials_disabled(config.site_isolation_trials_disabled);

        let static_lists = [
            (&config.isolated_origins, IsolatedOriginSource::CommandLine),
            (&config.field_trial_isolated_origins, IsolatedOriginSource::FieldTrial),
            (&config.enterprise_isolated_origins, IsolatedOriginSource::EnterprisePolicy),
        ];
        for (list, source) in static_lists {
            let patterns = OriginPattern::parse_list(&list.join(","));
            policy.add_isolated_origins(patterns, source, None)?;
        }

        let policy = Arc::new(policy);
        log::info!(
            "Isolation engine ready (site-per-process: {}, process limit: {})",
            config.site_per_process,
            config.max_renderer_processes
        );

        Ok(Self {
            allocator: Mutex::new(ProcessAllocator::new(config.process_limits())),
            resolver: IsolationResolver::new(Arc::clone(&policy), config),
            policy,
            groups: BrowsingGroups::new(),
            navigations: Mutex::new(HashMap::new()),
            loaded_profiles: Mutex::new(HashSet::new()),
            terminator,
            console: Arc::new(Mutex::new(Console::new())),
        })
    }

    pub fn config(&self) -> &IsolationConfig {
        self.resolver.config()
    }

    /// Shared handle to the isolated origin registry
    pub fn policy(&self) -> &Arc<SecurityPolicy> {
        &self.policy
    }

    /// Shared handle to the diagnostic console
    pub fn console(&self) -> Arc<Mutex<Console>> {
        Arc::clone(&self.console)
    }

    /// Parse and add isolated origin patterns. New entries only affect
    /// browsing groups created afterwards.
    pub fn add_isolated_origins<I, S>(&self, patterns: I, source: IsolatedOriginSource, profile: Option<ProfileId>) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| OriginPattern::parse(pattern.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.policy.add_isolated_origins(patterns, source, profile)
    }

    pub fn set_site_isolation_trials_disabled(&self, disabled: bool) {
        self.policy.set_site_isolation_trials_disabled(disabled);
    }

    /// Start a browsing group with no opener. It sees the registry as it
    /// is now.
    pub fn create_browsing_group(&self, profile: ProfileId) -> IsolationContext {
        if utils::lock(&self.loaded_profiles).insert(profile) {
            if let Err(e) = self.policy.load_profile(profile) {
                log::warn!("Could not restore isolation state for profile {}: {}", profile, e);
            }
        }
        let id = self.policy.allocate_group_id();
        self.groups.insert(BrowsingGroup::new(id, profile));
        log::debug!("Created browsing group {} in profile {}", id, profile);
        IsolationContext::new(id, profile)
    }

    pub fn destroy_browsing_group(&self, id: BrowsingGroupId) -> Result<()> {
        self.groups
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| PolicyError::UnknownBrowsingGroup(id).into())
    }

    /// Tear down a profile: its groups and in-memory registry state go
    /// away, its persisted state stays on disk
    pub fn remove_profile(&self, profile: ProfileId) {
        for id in self.groups.ids_for_profile(profile) {
            self.groups.remove(id);
        }
        self.policy.remove_profile(profile);
        utils::lock(&self.loaded_profiles).remove(&profile);
    }

    pub fn browsing_group_count(&self) -> usize {
        self.groups.len()
    }

    /// Spawn an unused process ahead of need
    pub fn spawn_process(&self, profile: ProfileId) -> ProcessId {
        utils::lock(&self.allocator).spawn_unused(profile)
    }

    /// Snapshot of a process
    pub fn process(&self, id: ProcessId) -> Option<RenderProcess> {
        utils::lock(&self.allocator).get_process(id).cloned()
    }

    pub fn live_process_count(&self) -> usize {
        utils::lock(&self.allocator).live_process_count()
    }

    pub fn update_process_memory(&self, id: ProcessId, bytes: usize) {
        utils::lock(&self.allocator).update_memory(id, bytes);
    }

    /// A document hosted by `id` went away
    pub fn document_closed(&self, id: ProcessId) {
        utils::lock(&self.allocator).detach_document(id);
    }

    pub fn navigation(&self, id: NavigationId) -> Option<NavigationRequest> {
        utils::lock(&self.navigations).get(&id).cloned()
    }

    pub fn navigation_state(&self, id: NavigationId) -> Option<NavigationState> {
        utils::lock(&self.navigations).get(&id).map(NavigationRequest::state)
    }

    fn group_for(&self, context: &IsolationContext) -> Result<Arc<Mutex<BrowsingGroup>>> {
        let group = self.groups.get(context.group)?;
        if utils::lock(&group).profile() != context.profile {
            return Err(PolicyError::UnknownBrowsingGroup(context.group).into());
        }
        Ok(group)
    }

    /// Run `f` on an in-flight navigation. Navigations that end up
    /// committed or cancelled are dropped afterwards.
    fn update_navigation<R>(&self, id: NavigationId, f: impl FnOnce(&mut NavigationRequest) -> Result<R>) -> Result<R> {
        let mut request = utils::lock(&self.navigations)
            .remove(&id)
            .ok_or(NavigationError::UnknownNavigation(id))?;
        let result = f(&mut request);
        if !request.state().is_terminal() {
            utils::lock(&self.navigations).insert(id, request);
        }
        result
    }

    /// Compute a provisional lock for the request's current URL and claim
    /// a process for it
    fn assign_provisional(&self, request: &mut NavigationRequest) -> Result<ProcessId> {
        let group = self.group_for(&request.context())?;
        let group = utils::lock(&group);
        let resolution = self.resolver.resolve(&request.isolation_origin(), None, &group);
        request.set_lock_computed(resolution.site_info.clone())?;

        let process = utils::lock(&self.allocator).claim(
            request.id(),
            &resolution.site_info,
            request.frame(),
            request.profile(),
            request.offered_process(),
        );
        drop(group);

        request.set_process_assigned(process)?;
        log::debug!(
            "Navigation {} to {} provisionally in process {}",
            request.id(),
            request.isolation_url(),
            process
        );
        Ok(process)
    }

    /// Start a navigation; returns its id
    pub fn begin_navigation(&self, params: NavigationParams) -> Result<NavigationId> {
        let mut request = NavigationRequest::new(params);
        request.query_isolation()?;
        self.assign_provisional(&mut request)?;
        let id = request.id();
        utils::lock(&self.navigations).insert(id, request);
        Ok(id)
    }

    /// Follow a server redirect; the lock is recomputed for the new URL
    pub fn redirect(&self, id: NavigationId, url: Url) -> Result<ProcessId> {
        self.update_navigation(id, |request| {
            request.redirect(url)?;
            self.assign_provisional(request)
        })
    }

    /// Apply a resolution's side effects to a locked group
    fn record_resolution(
        &self,
        group: &mut BrowsingGroup,
        origin: &Origin,
        resolution: &Resolution,
        navigation: Option<NavigationId>,
    ) -> Result<()> {
        if resolution.upgrade {
            group.upgrade_to_origin_keyed(origin);
        }
        if !origin.is_opaque() {
            match navigation {
                Some(navigation) => group.record_pending(navigation, origin.clone(), resolution.pinned.clone())?,
                None => {
                    group.pin(origin.clone(), resolution.pinned.clone());
                }
            }
        }
        if let Some(site) = &resolution.coop_site {
            log::info!("Group {}: {} isolated by COOP", group.id(), site);
            match navigation {
                Some(navigation) => group.add_pending_coop_site(navigation, site.clone(), resolution.coop_propagates),
                None => group.add_coop_site(site.clone(), resolution.coop_propagates),
            }
        }
        Ok(())
    }

    fn record_opt_in(&self, origin: &Origin, profile: ProfileId) {
        if let Err(e) = self.policy.record_opt_in_request(origin, profile) {
            log::warn!("Could not persist isolation opt-in for {}: {}", origin, e);
        }
    }

    /// Resolve with the response headers. Upgrading a site-keyed pin is
    /// refused while a live process still hosts the origin under that
    /// lock; the request is then denied like any other.
    fn resolve_response(&self, origin: &Origin, headers: &ResponseHeaders, group: &BrowsingGroup) -> Resolution {
        let resolution = self.resolver.resolve(origin, Some(headers), group);
        if resolution.upgrade && utils::lock(&self.allocator).hosts_under_site_lock(origin, group.id()) {
            log::warn!(
                "Not upgrading {} to origin-keyed in group {}: a live process hosts it site-keyed",
                origin,
                group.id()
            );
            return self.resolver.resolve_without_upgrade(origin, Some(headers), group);
        }
        resolution
    }

    /// Report a final resolution outside of any group lock
    fn report_resolution(&self, origin: &Origin, resolution: &Resolution) {
        if origin.is_opaque() {
            return;
        }
        if resolution.opt_in_denied {
            log::warn!("Origin-Agent-Cluster request from {} denied; origin already pinned", origin);
        }
        utils::lock(&self.console).record_origin_agent_cluster(origin, resolution.end_result);
    }

    /// The navigation's response arrived. The lock is recomputed from the
    /// headers, the decision is recorded as pending in the group, and the
    /// first response to reach an unused process pins it.
    pub fn response_received(&self, id: NavigationId, headers: &ResponseHeaders) -> Result<Assignment> {
        self.update_navigation(id, |request| {
            request.receive_response()?;
            let origin = request.isolation_origin();
            let group = self.group_for(&request.context())?;
            let mut group = utils::lock(&group);

            let resolution = self.resolve_response(&origin, headers, &group);
            self.record_resolution(&mut group, &origin, &resolution, Some(id))?;
            request.set_lock_computed(resolution.site_info.clone())?;

            let assignment = utils::lock(&self.allocator).pin_on_response(
                id,
                &resolution.site_info,
                request.frame(),
                request.profile(),
            );
            drop(group);

            request.set_process_assigned(assignment.process)?;
            request.set_opt_in_requested(resolution.opt_in_requested);
            self.report_resolution(&origin, &resolution);
            Ok(assignment)
        })
    }

    /// Commit the navigation into its assigned process. If that process
    /// died after the response, the navigation moves to another one.
    /// A failed commit leaves the navigation in flight.
    pub fn commit(&self, id: NavigationId) -> Result<ProcessId> {
        self.update_navigation(id, |request| {
            request.check_commit()?;
            let site_info = request
                .site_info()
                .cloned()
                .ok_or_else(|| SiteLockError::ConsistencyViolation(format!("navigation {} has no lock", id)))?;
            let group = self.group_for(&request.context())?;
            let mut group = utils::lock(&group);
            let process = {
                let mut allocator = utils::lock(&self.allocator);
                let claim_live = allocator
                    .claimed_process(id)
                    .and_then(|process| allocator.get_process(process))
                    .is_some_and(RenderProcess::is_running);
                if !claim_live {
                    let assignment = allocator.pin_on_response(id, &site_info, request.frame(), request.profile());
                    log::debug!(
                        "Navigation {} lost its process before commit; committing in process {}",
                        id,
                        assignment.process
                    );
                }
                allocator.commit(id, &site_info, group.id())?
            };
            group.commit(id)?;
            drop(group);
            request.commit(process)?;

            if request.opt_in_requested() && !site_info.origin.is_opaque() {
                self.record_opt_in(&site_info.origin, request.profile());
            }
            log::debug!("Navigation {} committed {} in process {}", id, site_info.origin, process);
            Ok(process)
        })
    }

    /// Cancel a navigation; whatever it recorded is dropped
    pub fn cancel(&self, id: NavigationId) -> Result<()> {
        self.update_navigation(id, |request| {
            request.cancel()?;
            if let Ok(group) = self.groups.get(request.group()) {
                utils::lock(&group).cancel(id);
            }
            utils::lock(&self.allocator).release(id);
            log::debug!("Navigation {} cancelled", id);
            Ok(())
        })
    }

    /// A document in the group received a user activation: COOP-isolated
    /// sites of the group now apply to new groups in the profile. Returns
    /// the number of registry entries added.
    pub fn notify_user_activation(&self, group: BrowsingGroupId) -> Result<usize> {
        let (sites, profile) = {
            let group = self.groups.get(group)?;
            let mut group = utils::lock(&group);
            (group.take_awaiting_activation(), group.profile())
        };
        if sites.is_empty() {
            return Ok(0);
        }
        let patterns = sites.into_iter().map(OriginPattern::Site);
        self.policy
            .add_isolated_origins(patterns, IsolatedOriginSource::Coop, Some(profile))
    }

    /// Compute the lock for a URL in a browsing group.
    ///
    /// With `headers` this is a final resolution and the decision is
    /// pinned in the group; without, it only looks.
    pub fn resolve_isolation(
        &self,
        url: &str,
        headers: Option<&ResponseHeaders>,
        context: &IsolationContext,
    ) -> Result<ProcessLock> {
        let origin = Origin::parse(url)?;
        let group = self.group_for(context)?;
        let resolution = {
            let mut group = utils::lock(&group);
            match headers {
                Some(headers) => {
                    let resolution = self.resolve_response(&origin, headers, &group);
                    self.record_resolution(&mut group, &origin, &resolution, None)?;
                    resolution
                }
                None => self.resolver.resolve(&origin, None, &group),
            }
        };
        if headers.is_some() {
            if resolution.opt_in_requested && !origin.is_opaque() {
                self.record_opt_in(&origin, context.profile);
            }
            self.report_resolution(&origin, &resolution);
        }
        Ok(resolution.site_info.lock())
    }

    /// Site info a URL would get in a browsing group, without recording
    pub fn site_info_for(&self, url: &str, context: &IsolationContext) -> Result<SiteInfo> {
        let origin = Origin::parse(url)?;
        let group = self.group_for(context)?;
        let group = utils::lock(&group);
        Ok(self.resolver.resolve(&origin, None, &group).site_info)
    }

    /// Whether a process carrying `lock` may host `url` in the context
    pub fn is_suitable_for(&self, lock: &ProcessLock, url: &str, context: &IsolationContext) -> Result<bool> {
        Ok(lock.is_suitable_for(&self.site_info_for(url, context)?))
    }

    /// Fail-closed data access check. Unknown, terminated and unused
    /// processes may access nothing. Otherwise the origin must be admitted
    /// by the process lock as seen from one of the groups the process
    /// hosts documents for.
    pub fn can_access_data_for(&self, process: ProcessId, origin: &Origin) -> bool {
        if origin.is_opaque() {
            return false;
        }
        let (lock, groups) = {
            let allocator = utils::lock(&self.allocator);
            match allocator.get_process(process) {
                Some(p) if p.is_running() && !p.is_unused => (p.lock.clone(), p.groups.clone()),
                _ => return false,
            }
        };
        groups.into_iter().any(|id| match self.groups.get(id) {
            Ok(group) => {
                let group = utils::lock(&group);
                lock.admits(&self.resolver.resolve(origin, None, &group).site_info)
            }
            Err(_) => false,
        })
    }

    /// Gate a storage request. A request for an origin the sender may not
    /// access terminates the sender.
    pub fn handle_storage_request(&self, request: &StorageRequest) -> Result<()> {
        if self.can_access_data_for(request.sender, &request.origin) {
            return Ok(());
        }
        let reason = request.kind.bad_message_reason();
        log::error!(
            "Process {} asked for {:?} data of {}: {}",
            request.sender,
            request.kind,
            request.origin,
            reason
        );
        self.terminator.terminate(request.sender, reason);
        utils::lock(&self.allocator).terminate(request.sender);
        utils::lock(&self.console).error(format!(
            "Renderer process {} terminated: {}",
            request.sender, reason
        ));
        Err(ProtocolViolation {
            process: request.sender,
            reason,
        }
        .into())
    }

    /// Drop terminated processes nothing refers to
    pub fn cleanup(&self) {
        utils::lock(&self.allocator).cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::CrossOriginOpenerPolicy;
    use crate::process::{BadMessageReason, MockProcessTerminator, StorageKind};

    const PROFILE: ProfileId = ProfileId(1);

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn engine() -> IsolationEngine {
        IsolationEngine::new(IsolationConfig::default()).unwrap()
    }

    fn navigate(engine: &IsolationEngine, params: NavigationParams, headers: ResponseHeaders) -> ProcessId {
        let id = engine.begin_navigation(params).unwrap();
        engine.response_received(id, &headers).unwrap();
        engine.commit(id).unwrap()
    }

    #[test]
    fn test_engine_creation() {
        let config = IsolationConfig {
            isolated_origins: vec!["https://a.com".to_string(), "not a pattern".to_string()],
            ..IsolationConfig::default()
        };
        let engine = IsolationEngine::new(config).unwrap();
        assert_eq!(engine.policy().isolated_origins(PROFILE).len(), 1);
    }

    #[test]
    fn test_navigation_lifecycle() {
        let engine = engine();
        let context = engine.create_browsing_group(PROFILE);
        let id = engine
            .begin_navigation(NavigationParams::main_frame(url("https://a.com/"), context))
            .unwrap();
        assert_eq!(engine.navigation_state(id), Some(NavigationState::ProcessAssigned));

        engine.response_received(id, &ResponseHeaders::new()).unwrap();
        let process = engine.commit(id).unwrap();
        assert_eq!(engine.navigation_state(id), None);
        assert!(engine.process(process).unwrap().hosted_origins.contains(&Origin::parse("https://a.com").unwrap()));
        assert!(matches!(
            engine.commit(id),
            Err(SiteLockError::Navigation(NavigationError::UnknownNavigation(_)))
        ));
    }

    #[test]
    fn test_redirect_recomputes_lock() {
        let engine = engine();
        engine
            .add_isolated_origins(["https://isolated.com"], IsolatedOriginSource::CommandLine, None)
            .unwrap();
        let context = engine.create_browsing_group(PROFILE);
        let id = engine
            .begin_navigation(NavigationParams::main_frame(url("https://plain.com/"), context))
            .unwrap();
        assert!(engine.navigation(id).unwrap().site_info().unwrap().lock().allows_any_site());

        engine.redirect(id, url("https://isolated.com/landing")).unwrap();
        engine.response_received(id, &ResponseHeaders::new()).unwrap();
        let process = engine.commit(id).unwrap();
        assert_eq!(
            engine.process(process).unwrap().lock.locked_site().map(|s| s.host().to_string()),
            Some("isolated.com".to_string())
        );
    }

    #[test]
    fn test_cancel_after_response_leaves_no_decision() {
        let engine = engine();
        let context = engine.create_browsing_group(PROFILE);
        let id = engine
            .begin_navigation(NavigationParams::main_frame(url("https://a.com/"), context))
            .unwrap();
        let headers = ResponseHeaders::new()
            .with_origin_agent_cluster(true)
            .with_coop(CrossOriginOpenerPolicy::SameOrigin);
        engine.response_received(id, &headers).unwrap();
        assert!(engine.site_info_for("https://a.com", &context).unwrap().is_origin_keyed);
        engine.cancel(id).unwrap();

        let info = engine.site_info_for("https://a.com", &context).unwrap();
        assert!(!info.is_origin_keyed);
        assert!(!info.requires_dedicated_process);
        assert!(!engine.policy().has_requested_opt_in(&Origin::parse("https://a.com").unwrap(), PROFILE));
        assert_eq!(engine.notify_user_activation(context.group).unwrap(), 0);
        assert!(engine.cancel(id).is_err());
    }

    #[test]
    fn test_commit_after_process_death_moves_navigation() {
        let engine = engine();
        let context = engine.create_browsing_group(PROFILE);
        let id = engine
            .begin_navigation(NavigationParams::subframe(url("https://a.com/"), context))
            .unwrap();
        let assigned = engine.response_received(id, &ResponseHeaders::new()).unwrap().process;

        // Nothing committed there yet, so any storage request is foreign
        let request = StorageRequest::local_storage(assigned, Origin::parse("https://a.com").unwrap());
        assert!(engine.handle_storage_request(&request).is_err());
        assert!(!engine.process(assigned).unwrap().is_running());

        let process = engine.commit(id).unwrap();
        assert_ne!(process, assigned);
        assert!(engine.process(process).unwrap().is_running());
        assert!(engine.can_access_data_for(process, &Origin::parse("https://a.com").unwrap()));
        assert_eq!(engine.navigation_state(id), None);
    }

    #[test]
    fn test_failed_commit_stays_retryable() {
        let engine = engine();
        let context = engine.create_browsing_group(PROFILE);
        let id = engine
            .begin_navigation(NavigationParams::main_frame(url("https://a.com/"), context))
            .unwrap();
        engine.response_received(id, &ResponseHeaders::new()).unwrap();
        engine.destroy_browsing_group(context.group).unwrap();

        assert!(engine.commit(id).is_err());
        assert_eq!(engine.navigation_state(id), Some(NavigationState::ProcessAssigned));
        engine.cancel(id).unwrap();
    }

    #[test]
    fn test_upgrade_refused_while_site_locked_process_hosts_origin() {
        let config = IsolationConfig {
            pinned_opt_in_policy: crate::config::PinnedOptInPolicy::Upgrade,
            isolated_origins: vec!["https://a.com".to_string()],
            ..IsolationConfig::default()
        };
        let engine = IsolationEngine::new(config).unwrap();
        let context = engine.create_browsing_group(PROFILE);
        let a = Origin::parse("https://a.com").unwrap();
        let process = navigate(
            &engine,
            NavigationParams::main_frame(url("https://a.com/"), context),
            ResponseHeaders::new(),
        );
        assert!(engine.can_access_data_for(process, &a));

        let opt_in = ResponseHeaders::new().with_origin_agent_cluster(true);
        let lock = engine.resolve_isolation("https://a.com", Some(&opt_in), &context).unwrap();
        assert_eq!(lock, engine.process(process).unwrap().lock);
        assert!(engine.can_access_data_for(process, &a));
        assert!(engine.handle_storage_request(&StorageRequest::local_storage(process, a.clone())).is_ok());
        assert_eq!(
            engine
                .console()
                .lock()
                .unwrap()
                .end_result_count(crate::navigation::OriginAgentClusterEndResult::RequestedButNotOriginKeyed),
            1
        );

        // Once that process is gone the upgrade goes through
        let foreign = StorageRequest::local_storage(process, Origin::parse("https://other.com").unwrap());
        assert!(engine.handle_storage_request(&foreign).is_err());
        let lock = engine.resolve_isolation("https://a.com", Some(&opt_in), &context).unwrap();
        assert_eq!(lock.locked_origin(), Some(&a));
    }

    #[test]
    fn test_base_url_override_keeps_parent_and_child_together() {
        let engine = engine();
        engine
            .add_isolated_origins(["https://a.com"], IsolatedOriginSource::CommandLine, None)
            .unwrap();
        let context = engine.create_browsing_group(PROFILE);
        let parent = navigate(
            &engine,
            NavigationParams::main_frame(url("data:text/html,<iframe>"), context)
                .with_base_url_override(url("https://a.com/")),
            ResponseHeaders::new(),
        );
        let child = navigate(
            &engine,
            NavigationParams::subframe(url("https://a.com/child"), context),
            ResponseHeaders::new(),
        );

        assert_eq!(child, parent);
        let lock = engine.process(parent).unwrap().lock;
        assert_eq!(lock.locked_site(), Some(&crate::origin::Site::new("https", "a.com")));
        assert!(lock.is_suitable_for(&engine.site_info_for("https://a.com/child", &context).unwrap()));
    }

    #[test]
    fn test_unknown_group() {
        let engine = engine();
        let context = IsolationContext::new(BrowsingGroupId(99), PROFILE);
        assert!(matches!(
            engine.resolve_isolation("https://a.com", None, &context),
            Err(SiteLockError::Policy(PolicyError::UnknownBrowsingGroup(_)))
        ));
    }

    #[test]
    fn test_wrong_profile_for_group() {
        let engine = engine();
        let context = engine.create_browsing_group(PROFILE);
        let other = IsolationContext::new(context.group, ProfileId(2));
        assert!(engine.site_info_for("https://a.com", &other).is_err());
    }

    #[test]
    fn test_invalid_url() {
        let engine = engine();
        let context = engine.create_browsing_group(PROFILE);
        assert!(matches!(
            engine.resolve_isolation("not a url", None, &context),
            Err(SiteLockError::Policy(PolicyError::InvalidUrl(_)))
        ));
    }

    #[test]
    fn test_storage_violation_terminates_sender() {
        let mut terminator = MockProcessTerminator::new();
        terminator
            .expect_terminate()
            .withf(|_, reason| *reason == BadMessageReason::BadOriginForSessionStorage)
            .times(1)
            .return_const(());
        let engine = IsolationEngine::with_terminator(IsolationConfig::default(), Arc::new(terminator)).unwrap();
        engine
            .add_isolated_origins(["https://isolated.com"], IsolatedOriginSource::CommandLine, None)
            .unwrap();
        let context = engine.create_browsing_group(PROFILE);
        let process = navigate(
            &engine,
            NavigationParams::main_frame(url("https://isolated.com/"), context),
            ResponseHeaders::new(),
        );

        let own = StorageRequest::local_storage(process, Origin::parse("https://isolated.com").unwrap());
        assert!(engine.handle_storage_request(&own).is_ok());

        let foreign = StorageRequest::new(
            StorageKind::SessionStorage,
            process,
            Origin::parse("https://other.com").unwrap(),
        );
        assert!(matches!(
            engine.handle_storage_request(&foreign),
            Err(SiteLockError::Protocol(_))
        ));
        assert!(!engine.process(process).unwrap().is_running());
        assert!(!engine.can_access_data_for(process, &Origin::parse("https://isolated.com").unwrap()));
    }

    #[test]
    fn test_unused_and_unknown_processes_access_nothing() {
        let engine = engine();
        let unused = engine.spawn_process(PROFILE);
        let origin = Origin::parse("https://a.com").unwrap();
        assert!(!engine.can_access_data_for(unused, &origin));
        assert!(!engine.can_access_data_for(ProcessId(999), &origin));
    }

    #[test]
    fn test_coop_activation_adds_profile_entry() {
        let engine = engine();
        let context = engine.create_browsing_group(PROFILE);
        let headers = ResponseHeaders::new().with_coop(CrossOriginOpenerPolicy::SameOrigin);
        navigate(&engine, NavigationParams::main_frame(url("https://b.com/"), context), headers);

        assert_eq!(engine.notify_user_activation(context.group).unwrap(), 1);
        assert_eq!(engine.notify_user_activation(context.group).unwrap(), 0);
        let entries = engine.policy().isolated_origins(PROFILE);
        assert!(entries.iter().any(|e| e.source == IsolatedOriginSource::Coop));
        assert!(engine.policy().isolated_origins(ProfileId(2)).is_empty());
    }

    #[test]
    fn test_remove_profile() {
        let engine = engine();
        engine.create_browsing_group(PROFILE);
        engine.create_browsing_group(PROFILE);
        let other = engine.create_browsing_group(ProfileId(2));
        engine.remove_profile(PROFILE);
        assert_eq!(engine.browsing_group_count(), 1);
        assert!(engine.destroy_browsing_group(other.group).is_ok());
        assert!(engine.destroy_browsing_group(other.group).is_err());
    }

    #[test]
    fn test_console_reports_end_results() {
        let engine = engine();
        let context = engine.create_browsing_group(PROFILE);
        engine
            .resolve_isolation(
                "https://a.com",
                Some(&ResponseHeaders::new().with_origin_agent_cluster(true)),
                &context,
            )
            .unwrap();
        let console = engine.console();
        let console = console.lock().unwrap();
        assert_eq!(
            console.end_result_count(crate::navigation::OriginAgentClusterEndResult::RequestedAndOriginKeyed),
            1
        );
    }

    #[test]
    fn test_wildcard_keying_is_not_counted_as_origin_agent_cluster() {
        use crate::navigation::OriginAgentClusterEndResult;

        let engine = engine();
        engine
            .add_isolated_origins(["https://[*.]wild.com"], IsolatedOriginSource::CommandLine, None)
            .unwrap();
        let context = engine.create_browsing_group(PROFILE);
        let lock = engine
            .resolve_isolation("https://a.wild.com", Some(&ResponseHeaders::new()), &context)
            .unwrap();
        assert!(lock.locked_origin().is_some());

        let console = engine.console();
        let console = console.lock().unwrap();
        assert_eq!(console.end_result_count(OriginAgentClusterEndResult::NotRequestedButOriginKeyed), 0);
        assert_eq!(console.end_result_count(OriginAgentClusterEndResult::NotRequestedAndNotOriginKeyed), 1);
    }
}
