//! Server selection state machine and the transport work its transitions
//! require.
//!
//! Transitions are computed synchronously on the engine loop; the transport
//! calls they imply run off-loop and report back with the generation of the
//! context they targeted. A result whose generation is no longer current is
//! dropped, so a slow resync for a server the user already left is harmless.

use merchant_watch_protocol::MerchantGroupPayload;
use tracing::{info, warn};

use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub region: String,
    pub server: String,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unselected,
    Selected(SessionContext),
}

/// Transport work for one selection change, run in this order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchPlan {
    pub unsubscribe: Option<String>,
    pub subscribe: Option<SessionContext>,
}

impl SwitchPlan {
    pub fn is_empty(&self) -> bool {
        self.unsubscribe.is_none() && self.subscribe.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub plan: SwitchPlan,
    pub region_changed: bool,
    pub server_changed: bool,
}

#[derive(Debug)]
pub struct SessionController {
    region: Option<String>,
    state: SessionState,
    generation: u64,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            region: None,
            state: SessionState::Unselected,
            generation: 0,
        }
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn current(&self) -> Option<&SessionContext> {
        match &self.state {
            SessionState::Selected(context) => Some(context),
            SessionState::Unselected => None,
        }
    }

    pub fn current_server(&self) -> Option<&str> {
        self.current().map(|context| context.server.as_str())
    }

    /// True while the context tagged `generation` is still the selected one.
    pub fn is_current(&self, generation: u64) -> bool {
        self.current()
            .map(|context| context.generation == generation)
            .unwrap_or(false)
    }

    /// Moves to the given selection. Blank values count as unset, and a
    /// server without a region is ignored.
    pub fn select(&mut self, region: Option<&str>, server: Option<&str>) -> Transition {
        let region = normalize(region);
        let server = if region.is_some() {
            normalize(server)
        } else {
            None
        };
        let region_changed = region != self.region;
        let previous = self.current().cloned();

        let unchanged = match (&previous, &server) {
            (Some(previous), Some(server)) => {
                &previous.server == server && Some(&previous.region) == region.as_ref()
            }
            (None, None) => true,
            _ => false,
        };
        self.region = region.clone();
        if unchanged {
            return Transition {
                plan: SwitchPlan::default(),
                region_changed,
                server_changed: false,
            };
        }

        let next = match (region, server) {
            (Some(region), Some(server)) => {
                self.generation += 1;
                Some(SessionContext {
                    region,
                    server,
                    generation: self.generation,
                })
            }
            _ => None,
        };
        self.state = match &next {
            Some(context) => SessionState::Selected(context.clone()),
            None => SessionState::Unselected,
        };
        info!(
            from = ?previous.as_ref().map(|context| context.server.as_str()),
            to = ?next.as_ref().map(|context| context.server.as_str()),
            "Server selection changed"
        );

        Transition {
            plan: SwitchPlan {
                unsubscribe: previous.map(|context| context.server),
                subscribe: next,
            },
            region_changed,
            server_changed: true,
        }
    }
}

fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSnapshot {
    pub context: SessionContext,
    pub groups: Vec<MerchantGroupPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// The server requires a newer client; the session cannot continue.
    ReloadRequired,
    Resync(LoadedSnapshot),
    /// Nothing selected, nothing to resync.
    Idle,
    Failed,
}

/// Unsubscribes the old channel, then subscribes the new one and loads its
/// snapshot. Subscribe completes before the snapshot is requested.
pub async fn run_switch(transport: &dyn Transport, plan: &SwitchPlan) -> Option<LoadedSnapshot> {
    if let Some(previous) = &plan.unsubscribe {
        if let Err(err) = transport.unsubscribe(previous).await {
            warn!(error = %err, server = %previous, "Failed to unsubscribe from server");
        }
    }
    let context = plan.subscribe.as_ref()?;
    if let Err(err) = transport.subscribe(&context.server).await {
        warn!(error = %err, server = %context.server, "Failed to subscribe to server");
        return None;
    }
    load_snapshot(transport, context).await
}

/// Checks client compatibility after a reconnect, then reloads the current
/// server's snapshot.
pub async fn run_reconnect(
    transport: &dyn Transport,
    context: Option<&SessionContext>,
    client_version: u32,
) -> ReconnectOutcome {
    match transport.has_newer_client(client_version).await {
        Ok(true) => {
            warn!(client_version, "Server requires a newer client");
            return ReconnectOutcome::ReloadRequired;
        }
        Ok(false) => {}
        Err(err) => {
            warn!(error = %err, "Client version check failed; resyncing anyway");
        }
    }
    let Some(context) = context else {
        return ReconnectOutcome::Idle;
    };
    match load_snapshot(transport, context).await {
        Some(snapshot) => ReconnectOutcome::Resync(snapshot),
        None => ReconnectOutcome::Failed,
    }
}

async fn load_snapshot(
    transport: &dyn Transport,
    context: &SessionContext,
) -> Option<LoadedSnapshot> {
    match transport.request_snapshot(&context.server).await {
        Ok(groups) => Some(LoadedSnapshot {
            context: context.clone(),
            groups,
        }),
        Err(err) => {
            warn!(error = %err, server = %context.server, "Failed to load server snapshot");
            None
        }
    }
}
