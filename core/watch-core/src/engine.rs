//! The engine loop: single owner of all merchant state.
//!
//! Ticks, pushed events, selection changes, resync results and queries are
//! all handled on one task, one at a time. Transport calls that may suspend
//! (subscribe, unsubscribe, snapshot, version check) run on helper tasks
//! and post their results back as commands, tagged with the session
//! generation they were started for.

use chrono::FixedOffset;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalogue::Catalogue;
use crate::config::WatchConfig;
use crate::error::{Result, WatchError};
use crate::notify::{NotificationSink, Notifier, SoundPlayer};
use crate::reconcile;
use crate::session::{
    run_reconnect, run_switch, LoadedSnapshot, ReconnectOutcome, SessionController, SwitchPlan,
};
use crate::settings::SettingsProvider;
use crate::store::{GroupStore, GroupView};
use crate::ticker::{Clock, Ticker};
use crate::transport::{Transport, TransportEvent};

/// Collaborators the engine is wired to.
pub struct EngineDeps {
    pub catalogue: Arc<Catalogue>,
    pub config: WatchConfig,
    pub settings: Arc<dyn SettingsProvider>,
    pub transport: Arc<dyn Transport>,
    pub sink: Arc<dyn NotificationSink>,
    pub sound: Arc<dyn SoundPlayer>,
    pub clock: Arc<dyn Clock>,
    pub client_version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineExit {
    Shutdown,
    /// The server requires a newer client; the host must restart.
    ReloadRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestNotification {
    Found,
    Spawn,
}

type Selection = (Option<String>, Option<String>);

enum Command {
    Select {
        region: Option<String>,
        server: Option<String>,
    },
    SwitchLoaded(LoadedSnapshot),
    ReconnectFinished(ReconnectOutcome),
    Groups(oneshot::Sender<Vec<GroupView>>),
    Test {
        merchant: String,
        kind: TestNotification,
    },
}

/// Cheap handle for driving a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    changes: watch::Receiver<u64>,
    shutdown: CancellationToken,
}

impl EngineHandle {
    pub fn select_server(&self, region: Option<&str>, server: Option<&str>) -> Result<()> {
        self.send(Command::Select {
            region: region.map(str::to_string),
            server: server.map(str::to_string),
        })
    }

    /// Groups in display order.
    pub async fn groups(&self) -> Result<Vec<GroupView>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Groups(reply))?;
        response.await.map_err(|_| WatchError::EngineStopped)
    }

    /// Raises a notification for `merchant` without consulting the policy.
    pub fn test_notification(&self, merchant: &str, kind: TestNotification) -> Result<()> {
        self.send(Command::Test {
            merchant: merchant.to_string(),
            kind,
        })
    }

    /// Revision counter bumped after every tick pass and reconciliation
    /// pass. Only the change matters, not the value.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| WatchError::EngineStopped)
    }
}

/// Spawns the engine loop on the current tokio runtime.
pub fn start(deps: EngineDeps) -> (EngineHandle, JoinHandle<EngineExit>) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (changes_tx, changes_rx) = watch::channel(0u64);
    let shutdown = CancellationToken::new();

    let engine = Engine::new(deps, commands_tx.clone(), changes_tx, shutdown.clone());
    let task = tokio::spawn(engine.run(commands_rx));

    let handle = EngineHandle {
        commands: commands_tx,
        changes: changes_rx,
        shutdown,
    };
    (handle, task)
}

struct Engine {
    catalogue: Arc<Catalogue>,
    config: WatchConfig,
    settings: Arc<dyn SettingsProvider>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    client_version: u32,
    notifier: Notifier,
    store: GroupStore,
    session: SessionController,
    commands: mpsc::UnboundedSender<Command>,
    changes: watch::Sender<u64>,
    selection_writer: mpsc::UnboundedSender<Selection>,
    // Serializes transport work so a switch's unsubscribe/subscribe pair
    // never interleaves with the next one.
    transport_ops: Arc<Mutex<()>>,
    shutdown: CancellationToken,
}

impl Engine {
    fn new(
        deps: EngineDeps,
        commands: mpsc::UnboundedSender<Command>,
        changes: watch::Sender<u64>,
        shutdown: CancellationToken,
    ) -> Self {
        let store = GroupStore::new(&deps.catalogue, deps.config.window_length());
        let selection_writer = spawn_selection_writer(Arc::clone(&deps.settings));
        Self {
            notifier: Notifier::new(deps.sink, deps.sound),
            catalogue: deps.catalogue,
            config: deps.config,
            settings: deps.settings,
            transport: deps.transport,
            clock: deps.clock,
            client_version: deps.client_version,
            store,
            session: SessionController::new(),
            commands,
            changes,
            selection_writer,
            transport_ops: Arc::new(Mutex::new(())),
            shutdown,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> EngineExit {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let subscriptions = self.transport.attach(events_tx);
        let mut ticker = Ticker::new(self.config.tick_interval());
        let shutdown = self.shutdown.clone();

        info!(
            merchants = self.store.len(),
            tick_ms = ticker.period().as_millis() as u64,
            subscriptions = subscriptions.len(),
            "Merchant engine started"
        );

        let (region, server) = self.settings.saved_selection();
        self.apply_selection(region.as_deref(), server.as_deref(), false);

        let exit = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break EngineExit::Shutdown,
                _ = ticker.tick() => self.on_tick(),
                Some(command) = commands.recv() => {
                    if let Some(exit) = self.handle_command(command) {
                        break exit;
                    }
                }
                Some(event) = events.recv() => self.handle_event(event),
            }
        };

        // Teardown: stop helper tasks, the ticker, then every transport
        // callback, in that order.
        self.shutdown.cancel();
        drop(ticker);
        drop(subscriptions);
        info!(exit = ?exit, "Merchant engine stopped");
        exit
    }

    fn handle_command(&mut self, command: Command) -> Option<EngineExit> {
        match command {
            Command::Select { region, server } => {
                self.apply_selection(region.as_deref(), server.as_deref(), true);
            }
            Command::SwitchLoaded(snapshot) => self.apply_snapshot(snapshot),
            Command::ReconnectFinished(outcome) => match outcome {
                ReconnectOutcome::ReloadRequired => return Some(EngineExit::ReloadRequired),
                ReconnectOutcome::Resync(snapshot) => self.apply_snapshot(snapshot),
                ReconnectOutcome::Idle | ReconnectOutcome::Failed => {}
            },
            Command::Groups(reply) => {
                if reply.send(self.store.views(self.clock.now())).is_err() {
                    debug!("Group query dropped before the reply");
                }
            }
            Command::Test { merchant, kind } => self.raise_test(&merchant, kind),
        }
        None
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::GroupUpdate { server, group } => {
                let config = self.settings.notification_config();
                let notifier = &self.notifier;
                let outcome = reconcile::apply_group_update(
                    &mut self.store,
                    self.session.current_server(),
                    &server,
                    &group,
                    |admitted| {
                        notifier.request_found(admitted, &config);
                    },
                );
                if !outcome.rejected {
                    debug!(
                        merchant = %group.merchant_name,
                        admitted = outcome.admitted,
                        duplicates = outcome.duplicates,
                        "Applied group update"
                    );
                    self.signal_changed();
                }
            }
            TransportEvent::VoteTotal {
                sighting_id,
                vote_total,
            } => {
                if reconcile::apply_vote_total(&mut self.store, &sighting_id, vote_total) {
                    self.signal_changed();
                }
            }
            TransportEvent::Reconnected => self.spawn_reconnect(),
        }
    }

    fn on_tick(&mut self) {
        if let Some(offset) = self.region_offset() {
            let now = self.clock.now();
            let rescheduled = self.store.schedule_tick(now, offset);
            if self.store.take_dirty() {
                self.store.resort();
            }
            if rescheduled > 0 {
                debug!(rescheduled, "Appearance windows advanced");
            }

            let config = self.settings.notification_config();
            for key in self
                .store
                .take_spawn_candidates(now, self.config.spawn_lookahead())
            {
                self.notifier
                    .request_spawn(self.store.group_at(key), &config);
            }
        }
        self.signal_changed();
    }

    fn apply_selection(&mut self, region: Option<&str>, server: Option<&str>, persist: bool) {
        let (region, server) = self.validate_selection(region, server);
        let transition = self.session.select(region.as_deref(), server.as_deref());

        if transition.region_changed {
            if let Some(offset) = self.region_offset() {
                self.store.force_reschedule(self.clock.now(), offset);
                self.store.take_dirty();
                self.store.resort();
            }
        }
        if transition.server_changed {
            // The previous server's sightings are meaningless on the new one.
            self.store.clear_sightings();
            if !transition.plan.is_empty() {
                self.spawn_switch(transition.plan);
            }
        }
        if transition.region_changed || transition.server_changed {
            if persist {
                self.persist_selection();
            }
            self.signal_changed();
        }
    }

    fn validate_selection(
        &self,
        region: Option<&str>,
        server: Option<&str>,
    ) -> (Option<String>, Option<String>) {
        let Some(region) = region.map(str::trim).filter(|value| !value.is_empty()) else {
            return (None, None);
        };
        if let Err(err) = self.catalogue.region(region) {
            warn!(error = %err, "Ignoring selection");
            return (None, None);
        }
        let server = server.map(str::trim).filter(|value| !value.is_empty());
        match server {
            Some(server) => match self.catalogue.check_server(region, server) {
                Ok(()) => (Some(region.to_string()), Some(server.to_string())),
                Err(err) => {
                    warn!(error = %err, "Ignoring server selection");
                    (Some(region.to_string()), None)
                }
            },
            None => (Some(region.to_string()), None),
        }
    }

    fn apply_snapshot(&mut self, snapshot: LoadedSnapshot) {
        if !self.session.is_current(snapshot.context.generation) {
            debug!(
                server = %snapshot.context.server,
                generation = snapshot.context.generation,
                "Discarding resync for a superseded session"
            );
            return;
        }
        let config = self.settings.notification_config();
        let notifier = &self.notifier;
        let outcome = reconcile::synchronize(&mut self.store, &snapshot.groups, |admitted| {
            notifier.request_found(admitted, &config);
        });
        info!(
            server = %snapshot.context.server,
            admitted = outcome.admitted,
            "Resynchronized with server"
        );
        self.signal_changed();
    }

    fn raise_test(&self, merchant: &str, kind: TestNotification) {
        let Some(group) = self.store.group(merchant) else {
            debug!(merchant = %merchant, "Test notification for unknown merchant");
            return;
        };
        let config = self.settings.notification_config();
        match kind {
            TestNotification::Found => {
                self.notifier.force_found(group, &config);
            }
            TestNotification::Spawn => self.notifier.force_spawn(group, &config),
        }
    }

    fn spawn_switch(&self, plan: SwitchPlan) {
        let transport = Arc::clone(&self.transport);
        let commands = self.commands.clone();
        let transport_ops = Arc::clone(&self.transport_ops);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let _serial = transport_ops.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => {}
                loaded = run_switch(transport.as_ref(), &plan) => {
                    if let Some(snapshot) = loaded {
                        let _ = commands.send(Command::SwitchLoaded(snapshot));
                    }
                }
            }
        });
    }

    fn spawn_reconnect(&self) {
        info!(server = ?self.session.current_server(), "Transport reconnected");
        let transport = Arc::clone(&self.transport);
        let commands = self.commands.clone();
        let transport_ops = Arc::clone(&self.transport_ops);
        let shutdown = self.shutdown.clone();
        let context = self.session.current().cloned();
        let client_version = self.client_version;
        tokio::spawn(async move {
            let _serial = transport_ops.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => {}
                outcome = run_reconnect(transport.as_ref(), context.as_ref(), client_version) => {
                    let _ = commands.send(Command::ReconnectFinished(outcome));
                }
            }
        });
    }

    fn persist_selection(&self) {
        let region = self.session.region().map(str::to_string);
        let server = self.session.current_server().map(str::to_string);
        if self.selection_writer.send((region, server)).is_err() {
            warn!("Settings writer stopped; selection not persisted");
        }
    }

    fn region_offset(&self) -> Option<FixedOffset> {
        let region = self.session.region()?;
        self.catalogue.region_offset(region).ok()
    }

    fn signal_changed(&self) {
        self.changes.send_modify(|revision| *revision = revision.wrapping_add(1));
    }
}

/// Persists selections one at a time, in the order they were made. The task
/// drains what is queued and exits once the engine drops its sender.
fn spawn_selection_writer(
    settings: Arc<dyn SettingsProvider>,
) -> mpsc::UnboundedSender<Selection> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Selection>();
    tokio::spawn(async move {
        while let Some((region, server)) = rx.recv().await {
            let settings = Arc::clone(&settings);
            let write = tokio::task::spawn_blocking(move || {
                settings.persist_selection(region.as_deref(), server.as_deref());
            });
            if let Err(err) = write.await {
                warn!(error = %err, "Settings write task failed");
            }
        }
    });
    tx
}
