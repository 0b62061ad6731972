//! Async glue between the network stack and the engine
//!
//! The network layer reports redirects, the final response and
//! cancellations over a channel; `drive_navigation` feeds them through
//! the engine until the navigation commits or is cancelled.

use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;

use super::IsolationEngine;
use crate::navigation::{NavigationId, NavigationParams, ResponseHeaders};
use crate::process::ProcessId;
use crate::utils::Result;

/// Something the network stack observed for a navigation
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    Redirect(Url),
    Response(ResponseHeaders),
    Cancelled,
}

/// How a driven navigation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    Committed {
        navigation: NavigationId,
        process: ProcessId,
    },
    Cancelled {
        navigation: NavigationId,
    },
}

impl NavigationOutcome {
    pub fn navigation(&self) -> NavigationId {
        match self {
            NavigationOutcome::Committed { navigation, .. } | NavigationOutcome::Cancelled { navigation } => *navigation,
        }
    }

    pub fn process(&self) -> Option<ProcessId> {
        match self {
            NavigationOutcome::Committed { process, .. } => Some(*process),
            NavigationOutcome::Cancelled { .. } => None,
        }
    }
}

/// Run a navigation to completion. A closed channel counts as a
/// cancellation. Engine errors cancel the navigation before being
/// returned.
pub async fn drive_navigation(
    engine: Arc<IsolationEngine>,
    params: NavigationParams,
    mut events: mpsc::Receiver<NetworkEvent>,
) -> Result<NavigationOutcome> {
    let navigation = engine.begin_navigation(params)?;

    loop {
        let step = match events.recv().await {
            Some(NetworkEvent::Redirect(url)) => engine.redirect(navigation, url).map(|_| None),
            Some(NetworkEvent::Response(headers)) => engine
                .response_received(navigation, &headers)
                .and_then(|_| engine.commit(navigation))
                .map(|process| Some(NavigationOutcome::Committed { navigation, process })),
            Some(NetworkEvent::Cancelled) | None => {
                engine.cancel(navigation)?;
                return Ok(NavigationOutcome::Cancelled { navigation });
            }
        };

        match step {
            Ok(Some(outcome)) => return Ok(outcome),
            Ok(None) => tokio::task::yield_now().await,
            Err(e) => {
                log::warn!("Navigation {} failed: {}", navigation, e);
                let _ = engine.cancel(navigation);
                return Err(e);
            }
        }
    }
}
