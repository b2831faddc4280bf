//! `replay` subcommand: runs the real engine against a scripted transport.
//!
//! Script format:
//!
//! ```json
//! {
//!   "min_client_version": 0,
//!   "snapshots": { "Azena": [{ "merchant_name": "Lucas", "sightings": [] }] },
//!   "steps": [
//!     { "after_ms": 0, "action": { "type": "select", "region": "North America East", "server": "Azena" } },
//!     { "after_ms": 200, "action": { "type": "push", "message": { "type": "update_vote_total", "sighting_id": "...", "vote_total": 3 } } },
//!     { "after_ms": 200, "action": { "type": "reconnect" } }
//!   ],
//!   "linger_ms": 500
//! }
//! ```

use async_trait::async_trait;
use merchant_watch_core::{
    start, Catalogue, DiscardSink, EngineDeps, EngineExit, EventSender, FileSettings, GroupView,
    MemorySettings, NotificationRequest, NotificationSink, NotifyError, SettingsProvider,
    SoundError, SoundPlayer, Subscription, SystemClock, Transport, TransportError,
    TransportEvent, WatchConfig,
};
use merchant_watch_protocol::{parse_push, parse_snapshot, MerchantGroupPayload, CLIENT_VERSION};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::CliError;

const DEFAULT_LINGER_MS: u64 = 500;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayScript {
    /// Clients older than this are told to reload on reconnect.
    #[serde(default)]
    pub min_client_version: u32,
    #[serde(default)]
    pub snapshots: HashMap<String, Value>,
    #[serde(default)]
    pub steps: Vec<ReplayStep>,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,
}

fn default_linger_ms() -> u64 {
    DEFAULT_LINGER_MS
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayStep {
    #[serde(default)]
    pub after_ms: u64,
    pub action: ReplayAction,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayAction {
    Push {
        message: Value,
    },
    Reconnect,
    Select {
        region: Option<String>,
        server: Option<String>,
    },
}

pub fn load_script(path: &Path) -> Result<ReplayScript, CliError> {
    let content = fs_err::read_to_string(path)
        .map_err(|err| CliError::Script(format!("{}: {}", path.display(), err)))?;
    serde_json::from_str(&content)
        .map_err(|err| CliError::Script(format!("{}: {}", path.display(), err)))
}

/// Transport whose server side is a script. Snapshots are validated up
/// front; pushes are validated as they are replayed.
pub struct ScriptedTransport {
    snapshots: HashMap<String, Vec<MerchantGroupPayload>>,
    min_client_version: u32,
    events: Arc<Mutex<Option<EventSender>>>,
}

impl ScriptedTransport {
    pub fn from_script(script: &ReplayScript) -> Result<Self, CliError> {
        let mut snapshots = HashMap::new();
        for (server, value) in &script.snapshots {
            let groups = parse_snapshot(value.clone())
                .map_err(|err| CliError::Script(format!("snapshot for {}: {}", server, err)))?;
            snapshots.insert(server.clone(), groups);
        }
        Ok(Self {
            snapshots,
            min_client_version: script.min_client_version,
            events: Arc::new(Mutex::new(None)),
        })
    }

    /// Delivers `event` to the attached engine. Returns false when nothing
    /// is attached any more.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let Ok(events) = self.events.lock() else {
            return false;
        };
        match events.as_ref() {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn subscribe(&self, server: &str) -> Result<(), TransportError> {
        info!(server = %server, "Subscribed to merchant channel");
        Ok(())
    }

    async fn unsubscribe(&self, server: &str) -> Result<(), TransportError> {
        info!(server = %server, "Unsubscribed from merchant channel");
        Ok(())
    }

    async fn request_snapshot(
        &self,
        server: &str,
    ) -> Result<Vec<MerchantGroupPayload>, TransportError> {
        Ok(self.snapshots.get(server).cloned().unwrap_or_default())
    }

    async fn has_newer_client(&self, client_version: u32) -> Result<bool, TransportError> {
        Ok(client_version < self.min_client_version)
    }

    fn attach(&self, events: EventSender) -> Vec<Subscription> {
        if let Ok(mut slot) = self.events.lock() {
            *slot = Some(events);
        }
        let slot = Arc::clone(&self.events);
        vec![Subscription::new("replay_events", move || {
            if let Ok(mut slot) = slot.lock() {
                slot.take();
            }
        })]
    }
}

/// Prints notifications to stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl NotificationSink for StdoutSink {
    fn notify(&self, request: &NotificationRequest) -> Result<(), NotifyError> {
        println!("[{}] {}", request.tag, request.title);
        for line in request.body.lines() {
            println!("    {}", line);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LoggedSound;

impl SoundPlayer for LoggedSound {
    fn play(&self) -> Result<(), SoundError> {
        debug!("Notification sound cue");
        Ok(())
    }
}

pub async fn run(
    config: WatchConfig,
    catalogue: Catalogue,
    script_path: &Path,
    settings_path: Option<PathBuf>,
    quiet: bool,
) -> Result<EngineExit, CliError> {
    let script = load_script(script_path)?;
    let transport = Arc::new(ScriptedTransport::from_script(&script)?);
    let settings: Arc<dyn SettingsProvider> = match settings_path {
        Some(path) => Arc::new(FileSettings::open(path)),
        None => Arc::new(MemorySettings::default()),
    };
    let sink: Arc<dyn NotificationSink> = if quiet {
        Arc::new(DiscardSink)
    } else {
        Arc::new(StdoutSink)
    };

    let (handle, task) = start(EngineDeps {
        catalogue: Arc::new(catalogue),
        config,
        settings,
        transport: transport.clone(),
        sink,
        sound: Arc::new(LoggedSound),
        clock: Arc::new(SystemClock),
        client_version: CLIENT_VERSION,
    });

    for (index, step) in script.steps.into_iter().enumerate() {
        tokio::time::sleep(Duration::from_millis(step.after_ms)).await;
        if task.is_finished() {
            warn!(step = index, "Engine stopped before the script finished");
            break;
        }
        match step.action {
            ReplayAction::Push { message } => match parse_push(message) {
                Ok(message) => {
                    transport.emit(message.into());
                }
                Err(err) => warn!(step = index, error = %err, "Skipping invalid push"),
            },
            ReplayAction::Reconnect => {
                transport.emit(TransportEvent::Reconnected);
            }
            ReplayAction::Select { region, server } => {
                handle.select_server(region.as_deref(), server.as_deref())?;
            }
        }
    }

    tokio::time::sleep(Duration::from_millis(script.linger_ms)).await;
    if let Ok(groups) = handle.groups().await {
        print_groups(&groups);
    }

    handle.shutdown();
    task.await.map_err(|err| CliError::Engine(err.to_string()))
}

fn print_groups(groups: &[GroupView]) {
    for group in groups.iter().filter(|group| !group.sightings.is_empty()) {
        println!("{} ({})", group.merchant_name, group.region);
        for sighting in &group.sightings {
            println!(
                "    {} | {} | votes {}",
                sighting.zone, sighting.card.name, sighting.votes
            );
        }
    }
}
