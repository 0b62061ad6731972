//! Per-navigation state machine

use std::sync::atomic::{AtomicU64, Ordering};

use url::Url;

use super::{FrameKind, NavigationId, NavigationState};
use crate::browsing::{BrowsingGroupId, IsolationContext, ProfileId};
use crate::origin::Origin;
use crate::process::{ProcessId, SiteInfo};
use crate::utils::NavigationError;

/// Everything needed to start a navigation
#[derive(Debug, Clone)]
pub struct NavigationParams {
    pub url: Url,
    pub context: IsolationContext,
    pub frame: FrameKind,
    /// Host-supplied base URL for documents loaded from data; main frames
    /// resolve isolation from it instead of the fetched URL
    pub base_url_override: Option<Url>,
    /// The frame's current process, offered for reuse
    pub current_process: Option<ProcessId>,
}

impl NavigationParams {
    pub fn main_frame(url: Url, context: IsolationContext) -> Self {
        Self {
            url,
            context,
            frame: FrameKind::MainFrame,
            base_url_override: None,
            current_process: None,
        }
    }

    pub fn subframe(url: Url, context: IsolationContext) -> Self {
        Self {
            frame: FrameKind::Subframe,
            ..Self::main_frame(url, context)
        }
    }

    pub fn with_base_url_override(mut self, base_url: Url) -> Self {
        self.base_url_override = Some(base_url);
        self
    }

    pub fn with_current_process(mut self, process: ProcessId) -> Self {
        self.current_process = Some(process);
        self
    }
}

/// A navigation in flight.
///
/// `NotStarted -> IsolationQueried -> LockComputed -> ProcessAssigned`,
/// with redirects returning to `IsolationQueried` and the response
/// recomputing the lock, then `Committed` or `Cancelled`.
#[derive(Debug, Clone)]
pub struct NavigationRequest {
    id: NavigationId,
    params: NavigationParams,
    state: NavigationState,
    url_chain: Vec<Url>,
    site_info: Option<SiteInfo>,
    process: Option<ProcessId>,
    response_received: bool,
    opt_in_requested: bool,
}

impl NavigationRequest {
    pub fn new(params: NavigationParams) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NavigationId(COUNTER.fetch_add(1, Ordering::SeqCst)),
            url_chain: vec![params.url.clone()],
            params,
            state: NavigationState::NotStarted,
            site_info: None,
            process: None,
            response_received: false,
            opt_in_requested: false,
        }
    }

    pub fn id(&self) -> NavigationId {
        self.id
    }

    pub fn state(&self) -> NavigationState {
        self.state
    }

    pub fn context(&self) -> IsolationContext {
        self.params.context
    }

    pub fn group(&self) -> BrowsingGroupId {
        self.params.context.group
    }

    pub fn profile(&self) -> ProfileId {
        self.params.context.profile
    }

    pub fn frame(&self) -> FrameKind {
        self.params.frame
    }

    pub fn offered_process(&self) -> Option<ProcessId> {
        self.params.current_process
    }

    /// Every URL the navigation has visited, last one current
    pub fn url_chain(&self) -> &[Url] {
        &self.url_chain
    }

    pub fn current_url(&self) -> &Url {
        self.url_chain.last().unwrap_or(&self.params.url)
    }

    /// URL isolation is computed from
    pub fn isolation_url(&self) -> &Url {
        match (&self.params.base_url_override, self.params.frame) {
            (Some(base), FrameKind::MainFrame) => base,
            _ => self.current_url(),
        }
    }

    pub fn isolation_origin(&self) -> Origin {
        Origin::from_url(self.isolation_url())
    }

    pub fn site_info(&self) -> Option<&SiteInfo> {
        self.site_info.as_ref()
    }

    pub fn process(&self) -> Option<ProcessId> {
        self.process
    }

    pub fn response_received(&self) -> bool {
        self.response_received
    }

    /// The response asked for an origin-keyed agent cluster
    pub fn opt_in_requested(&self) -> bool {
        self.opt_in_requested
    }

    pub fn set_opt_in_requested(&mut self, requested: bool) {
        self.opt_in_requested = requested;
    }

    fn transition(
        &mut self,
        allowed: &[NavigationState],
        to: NavigationState,
        action: &'static str,
    ) -> Result<(), NavigationError> {
        if !allowed.contains(&self.state) {
            return Err(NavigationError::InvalidTransition {
                from: self.state,
                action,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn query_isolation(&mut self) -> Result<(), NavigationError> {
        self.transition(
            &[NavigationState::NotStarted],
            NavigationState::IsolationQueried,
            "query isolation for",
        )
    }

    pub fn set_lock_computed(&mut self, site_info: SiteInfo) -> Result<(), NavigationError> {
        self.transition(
            &[NavigationState::IsolationQueried, NavigationState::ProcessAssigned],
            NavigationState::LockComputed,
            "compute lock for",
        )?;
        self.site_info = Some(site_info);
        Ok(())
    }

    pub fn set_process_assigned(&mut self, process: ProcessId) -> Result<(), NavigationError> {
        self.transition(
            &[NavigationState::LockComputed],
            NavigationState::ProcessAssigned,
            "assign process to",
        )?;
        self.process = Some(process);
        Ok(())
    }

    /// Follow a server redirect. The previous lock no longer applies.
    pub fn redirect(&mut self, url: Url) -> Result<(), NavigationError> {
        if self.response_received {
            return Err(NavigationError::InvalidTransition {
                from: self.state,
                action: "redirect",
            });
        }
        self.transition(
            &[NavigationState::LockComputed, NavigationState::ProcessAssigned],
            NavigationState::IsolationQueried,
            "redirect",
        )?;
        self.url_chain.push(url);
        self.site_info = None;
        Ok(())
    }

    /// The final response arrived; the lock is about to be recomputed
    pub fn receive_response(&mut self) -> Result<(), NavigationError> {
        if self.response_received || self.state != NavigationState::ProcessAssigned {
            return Err(NavigationError::InvalidTransition {
                from: self.state,
                action: "receive response for",
            });
        }
        self.response_received = true;
        Ok(())
    }

    /// Check that the navigation may commit, without changing its state
    pub fn check_commit(&self) -> Result<(), NavigationError> {
        if !self.response_received || self.state != NavigationState::ProcessAssigned {
            return Err(NavigationError::InvalidTransition {
                from: self.state,
                action: "commit",
            });
        }
        Ok(())
    }

    /// Commit into `process`. It differs from the assigned process when
    /// that one died before the commit.
    pub fn commit(&mut self, process: ProcessId) -> Result<(), NavigationError> {
        self.check_commit()?;
        self.state = NavigationState::Committed;
        self.process = Some(process);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), NavigationError> {
        if self.state.is_terminal() {
            return Err(NavigationError::InvalidTransition {
                from: self.state,
                action: "cancel",
            });
        }
        self.state = NavigationState::Cancelled;
        Ok(())
    }
}
