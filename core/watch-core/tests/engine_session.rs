//! Engine lifecycle tests against a recording transport.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use merchant_watch_core::settings::load_settings;
use merchant_watch_core::{
    start, Catalogue, Clock, EngineDeps, EngineExit, EngineHandle, EventSender, FileSettings,
    GroupView, MemorySettings, NotificationRequest, NotificationSink, NotifyError,
    SettingsProvider, Silent, Subscription, SystemClock, TestNotification, Transport,
    TransportError, TransportEvent, UserNotificationConfig, UserSettings, WatchConfig,
};
use merchant_watch_protocol::{MerchantGroupPayload, Sighting, CLIENT_VERSION};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

const REGION: &str = "North America East";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Subscribe(String),
    Unsubscribe(String),
    Snapshot(String),
    VersionCheck(u32),
}

#[derive(Default)]
struct FakeTransport {
    calls: Mutex<Vec<Call>>,
    snapshots: Mutex<HashMap<String, Vec<MerchantGroupPayload>>>,
    newer_client: AtomicBool,
    gate: Mutex<Option<(String, Arc<Notify>)>>,
    events: Mutex<Option<EventSender>>,
    released: Arc<AtomicBool>,
}

impl FakeTransport {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn set_snapshot(&self, server: &str, groups: Vec<MerchantGroupPayload>) {
        self.snapshots
            .lock()
            .expect("snapshots lock")
            .insert(server.to_string(), groups);
    }

    /// Holds snapshot requests for `server` until the returned gate is
    /// notified.
    fn hold_snapshot(&self, server: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().expect("gate lock") = Some((server.to_string(), Arc::clone(&gate)));
        gate
    }

    fn push(&self, event: TransportEvent) {
        let events = self.events.lock().expect("events lock");
        events
            .as_ref()
            .expect("engine attached")
            .send(event)
            .expect("engine running");
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn subscribe(&self, server: &str) -> Result<(), TransportError> {
        self.record(Call::Subscribe(server.to_string()));
        Ok(())
    }

    async fn unsubscribe(&self, server: &str) -> Result<(), TransportError> {
        self.record(Call::Unsubscribe(server.to_string()));
        Ok(())
    }

    async fn request_snapshot(
        &self,
        server: &str,
    ) -> Result<Vec<MerchantGroupPayload>, TransportError> {
        self.record(Call::Snapshot(server.to_string()));
        let gate = self
            .gate
            .lock()
            .expect("gate lock")
            .as_ref()
            .filter(|(held, _)| held == server)
            .map(|(_, gate)| Arc::clone(gate));
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self
            .snapshots
            .lock()
            .expect("snapshots lock")
            .get(server)
            .cloned()
            .unwrap_or_default())
    }

    async fn has_newer_client(&self, client_version: u32) -> Result<bool, TransportError> {
        self.record(Call::VersionCheck(client_version));
        Ok(self.newer_client.load(Ordering::SeqCst))
    }

    fn attach(&self, events: EventSender) -> Vec<Subscription> {
        *self.events.lock().expect("events lock") = Some(events);
        let released = Arc::clone(&self.released);
        vec![Subscription::new("merchant_events", move || {
            released.store(true, Ordering::SeqCst);
        })]
    }
}

#[derive(Default)]
struct RecordingSink {
    raised: Mutex<Vec<NotificationRequest>>,
}

impl RecordingSink {
    fn titles(&self) -> Vec<String> {
        self.raised
            .lock()
            .expect("sink lock")
            .iter()
            .map(|request| request.title.clone())
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, request: &NotificationRequest) -> Result<(), NotifyError> {
        self.raised
            .lock()
            .expect("sink lock")
            .push(request.clone());
        Ok(())
    }
}

fn catalogue() -> Catalogue {
    serde_json::from_value(json!({
        "merchants": {
            "Lucas": {
                "name": "Lucas",
                "region": "Yudia",
                "cards": [{ "name": "Seria", "rarity": "rare" }],
                "appearance_times": ["11:30:00", "17:30:00"]
            },
            "Morris": {
                "name": "Morris",
                "region": "West Luterra",
                "appearance_times": ["11:30:00", "15:30:00"]
            }
        },
        "server_regions": {
            "North America East": { "utc_offset_minutes": -300, "servers": ["Azena", "Una"] },
            "Europe Central": { "utc_offset_minutes": 60, "servers": ["Neria"] }
        }
    }))
    .expect("catalogue fixture")
}

fn legendary_sighting(zone: &str) -> Sighting {
    serde_json::from_value(json!({
        "id": Uuid::new_v4(),
        "zone": zone,
        "card": { "name": "Seria", "rarity": "rare" },
        "rapport_rarity": "legendary",
        "votes": 0
    }))
    .expect("sighting fixture")
}

fn group(merchant: &str, sightings: Vec<Sighting>) -> MerchantGroupPayload {
    MerchantGroupPayload {
        merchant_name: merchant.to_string(),
        sightings,
    }
}

struct Harness {
    handle: EngineHandle,
    task: tokio::task::JoinHandle<EngineExit>,
    transport: Arc<FakeTransport>,
    sink: Arc<RecordingSink>,
}

/// Clock the test moves by hand.
struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    fn at(value: &str) -> Self {
        Self(Mutex::new(utc(value)))
    }

    fn set(&self, value: &str) {
        *self.0.lock().expect("clock lock") = utc(value);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().expect("clock lock")
    }
}

fn utc(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("timestamp")
        .with_timezone(&Utc)
}

fn saved(server: Option<&str>) -> Arc<MemorySettings> {
    Arc::new(MemorySettings::new(UserSettings {
        region: Some(REGION.to_string()),
        server: server.map(str::to_string),
        ..UserSettings::default()
    }))
}

fn start_engine(transport: Arc<FakeTransport>, server: Option<&str>) -> Harness {
    start_engine_with(transport, saved(server), Arc::new(SystemClock))
}

fn start_engine_with(
    transport: Arc<FakeTransport>,
    settings: Arc<dyn SettingsProvider>,
    clock: Arc<dyn Clock>,
) -> Harness {
    let sink = Arc::new(RecordingSink::default());
    let (handle, task) = start(EngineDeps {
        catalogue: Arc::new(catalogue()),
        config: WatchConfig::default(),
        settings,
        transport: transport.clone(),
        sink: sink.clone(),
        sound: Arc::new(Silent),
        clock,
        client_version: CLIENT_VERSION,
    });
    Harness {
        handle,
        task,
        transport,
        sink,
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

async fn groups_until(
    handle: &EngineHandle,
    check: impl Fn(&[GroupView]) -> bool,
) -> Vec<GroupView> {
    for _ in 0..400 {
        let groups = handle.groups().await.expect("engine running");
        if check(&groups) {
            return groups;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("groups never reached expected state");
}

fn sightings_of<'a>(groups: &'a [GroupView], merchant: &str) -> &'a [Sighting] {
    groups
        .iter()
        .find(|group| group.merchant_name == merchant)
        .map(|group| group.sightings.as_slice())
        .unwrap_or(&[])
}

#[tokio::test]
async fn restores_saved_server_and_switches_in_order() {
    let transport = Arc::new(FakeTransport::default());
    let harness = start_engine(transport, Some("Azena"));

    eventually(|| harness.transport.calls().len() == 2).await;
    assert_eq!(
        harness.transport.calls(),
        vec![
            Call::Subscribe("Azena".to_string()),
            Call::Snapshot("Azena".to_string()),
        ]
    );

    harness
        .handle
        .select_server(Some(REGION), Some("Una"))
        .expect("select");
    eventually(|| harness.transport.calls().len() == 5).await;
    assert_eq!(
        harness.transport.calls()[2..],
        [
            Call::Unsubscribe("Azena".to_string()),
            Call::Subscribe("Una".to_string()),
            Call::Snapshot("Una".to_string()),
        ]
    );

    harness.handle.shutdown();
    assert_eq!(harness.task.await.expect("join"), EngineExit::Shutdown);
}

#[tokio::test]
async fn reselecting_current_server_does_nothing() {
    let transport = Arc::new(FakeTransport::default());
    let harness = start_engine(transport, Some("Azena"));
    eventually(|| harness.transport.calls().len() == 2).await;

    harness
        .handle
        .select_server(Some(REGION), Some("Azena"))
        .expect("select");
    harness.handle.groups().await.expect("round trip");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.transport.calls().len(), 2);

    harness.handle.shutdown();
    harness.task.await.expect("join");
}

#[tokio::test]
async fn found_notification_for_current_server_only() {
    let transport = Arc::new(FakeTransport::default());
    let harness = start_engine(transport, Some("Azena"));
    eventually(|| harness.transport.calls().len() == 2).await;

    harness.transport.push(TransportEvent::GroupUpdate {
        server: "Una".to_string(),
        group: group("Morris", vec![legendary_sighting("Prideholme")]),
    });
    harness.transport.push(TransportEvent::GroupUpdate {
        server: "Azena".to_string(),
        group: group("Lucas", vec![legendary_sighting("Cradle of the Sea")]),
    });

    let groups = groups_until(&harness.handle, |groups| {
        !sightings_of(groups, "Lucas").is_empty()
    })
    .await;
    assert!(sightings_of(&groups, "Morris").is_empty());
    assert_eq!(
        harness.sink.titles(),
        vec!["Wandering Merchant \"Lucas\" found".to_string()]
    );

    harness.handle.shutdown();
    harness.task.await.expect("join");
}

#[tokio::test]
async fn replayed_push_is_idempotent_and_votes_apply() {
    let transport = Arc::new(FakeTransport::default());
    let harness = start_engine(transport, Some("Azena"));
    eventually(|| harness.transport.calls().len() == 2).await;

    let sighting = legendary_sighting("Cradle of the Sea");
    let update = TransportEvent::GroupUpdate {
        server: "Azena".to_string(),
        group: group("Lucas", vec![sighting.clone()]),
    };
    harness.transport.push(update.clone());
    harness.transport.push(update);
    harness.transport.push(TransportEvent::VoteTotal {
        sighting_id: sighting.id,
        vote_total: 7,
    });

    let groups = groups_until(&harness.handle, |groups| {
        sightings_of(groups, "Lucas")
            .first()
            .map(|sighting| sighting.votes == 7)
            .unwrap_or(false)
    })
    .await;
    assert_eq!(sightings_of(&groups, "Lucas").len(), 1);
    assert_eq!(harness.sink.titles().len(), 1);

    harness.handle.shutdown();
    harness.task.await.expect("join");
}

#[tokio::test]
async fn reconnect_checks_version_then_resyncs_once() {
    let transport = Arc::new(FakeTransport::default());
    transport.set_snapshot(
        "Azena",
        vec![group("Lucas", vec![legendary_sighting("Cradle of the Sea")])],
    );
    let harness = start_engine(transport, Some("Azena"));
    eventually(|| harness.transport.calls().len() == 2).await;

    harness.transport.push(TransportEvent::Reconnected);
    eventually(|| harness.transport.calls().len() == 4).await;
    assert_eq!(
        harness.transport.calls()[2..],
        [
            Call::VersionCheck(CLIENT_VERSION),
            Call::Snapshot("Azena".to_string()),
        ]
    );

    // The resync clears the seen index, so the same sighting notifies again.
    eventually(|| harness.sink.titles().len() == 2).await;
    let groups = harness.handle.groups().await.expect("groups");
    assert_eq!(sightings_of(&groups, "Lucas").len(), 1);
    assert!(!harness.task.is_finished());

    harness.handle.shutdown();
    assert_eq!(harness.task.await.expect("join"), EngineExit::Shutdown);
}

#[tokio::test]
async fn newer_client_required_stops_engine_without_resync() {
    let transport = Arc::new(FakeTransport::default());
    let harness = start_engine(transport, Some("Azena"));
    eventually(|| harness.transport.calls().len() == 2).await;

    harness.transport.newer_client.store(true, Ordering::SeqCst);
    harness.transport.push(TransportEvent::Reconnected);

    let exit = tokio::time::timeout(Duration::from_secs(2), harness.task)
        .await
        .expect("engine exits")
        .expect("join");
    assert_eq!(exit, EngineExit::ReloadRequired);
    assert_eq!(
        harness.transport.calls()[2..],
        [Call::VersionCheck(CLIENT_VERSION)]
    );
    assert!(harness.transport.released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn resync_for_superseded_server_is_discarded() {
    let transport = Arc::new(FakeTransport::default());
    transport.set_snapshot(
        "Azena",
        vec![group("Lucas", vec![legendary_sighting("Cradle of the Sea")])],
    );
    let gate = transport.hold_snapshot("Azena");
    let harness = start_engine(transport, Some("Azena"));
    eventually(|| harness.transport.calls().len() == 2).await;

    harness
        .handle
        .select_server(Some(REGION), Some("Una"))
        .expect("select");
    // Commands are handled in order, so the switch is applied after this.
    harness.handle.groups().await.expect("round trip");
    gate.notify_one();

    eventually(|| harness.transport.calls().len() == 5).await;
    let groups = harness.handle.groups().await.expect("groups");
    assert!(sightings_of(&groups, "Lucas").is_empty());
    assert!(harness.sink.titles().is_empty());

    harness.handle.shutdown();
    harness.task.await.expect("join");
}

#[tokio::test]
async fn shutdown_releases_transport_subscriptions() {
    let transport = Arc::new(FakeTransport::default());
    let harness = start_engine(transport, None);
    harness.handle.groups().await.expect("running");
    assert!(!harness.transport.released.load(Ordering::SeqCst));
    assert!(harness.transport.calls().is_empty());

    harness.handle.shutdown();
    assert_eq!(harness.task.await.expect("join"), EngineExit::Shutdown);
    assert!(harness.transport.released.load(Ordering::SeqCst));
    assert!(harness.handle.groups().await.is_err());
}

#[tokio::test]
async fn test_notification_bypasses_policy() {
    let transport = Arc::new(FakeTransport::default());
    let harness = start_engine(transport, None);

    harness
        .handle
        .test_notification("Morris", TestNotification::Spawn)
        .expect("send");
    eventually(|| harness.sink.titles().len() == 1).await;
    assert_eq!(
        harness.sink.titles(),
        vec!["Wandering Merchant \"Morris\" appeared".to_string()]
    );

    harness.handle.shutdown();
    harness.task.await.expect("join");
}

fn appeared(sink: &RecordingSink, merchant: &str) -> usize {
    let title = format!("Wandering Merchant \"{}\" appeared", merchant);
    sink.titles().iter().filter(|raised| **raised == title).count()
}

#[tokio::test(start_paused = true)]
async fn ticks_announce_spawn_once_and_reschedule_after_expiry() {
    // North America East is UTC-5: the 11:30 local window opens at 16:30 UTC.
    let clock = Arc::new(ManualClock::at("2026-03-02T16:00:00Z"));
    let settings = saved(Some("Azena"));
    settings.set_notification_config(UserNotificationConfig {
        notify_merchant_appearance: true,
        ..UserNotificationConfig::default()
    });
    let transport = Arc::new(FakeTransport::default());
    let harness = start_engine_with(transport, settings, clock.clone());
    // Let the initial switch settle so only ticks move the revision below.
    eventually(|| harness.transport.calls().len() == 2).await;
    let mut changes = harness.handle.changes();

    for now in [
        "2026-03-02T16:29:59.500Z",
        "2026-03-02T16:30:00.500Z",
        "2026-03-02T16:30:01.500Z",
    ] {
        clock.set(now);
        let before = *changes.borrow_and_update();
        changes.changed().await.expect("tick pass");
        assert!(*changes.borrow_and_update() > before);
    }
    assert_eq!(appeared(&harness.sink, "Lucas"), 1);
    assert_eq!(appeared(&harness.sink, "Morris"), 1);

    clock.set("2026-03-02T16:55:30Z");
    changes.borrow_and_update();
    changes.changed().await.expect("tick pass");

    let groups = harness.handle.groups().await.expect("groups");
    let lucas = groups
        .iter()
        .find(|group| group.merchant_name == "Lucas")
        .expect("lucas");
    assert_eq!(lucas.next_appearance, Some(utc("2026-03-02T22:30:00Z")));
    assert_eq!(lucas.appearance_expires, Some(utc("2026-03-02T22:55:00Z")));
    // Morris' 15:30 local window comes first now.
    assert_eq!(groups[0].merchant_name, "Morris");
    assert_eq!(groups[0].next_appearance, Some(utc("2026-03-02T20:30:00Z")));
    assert_eq!(harness.sink.titles().len(), 2);

    harness.handle.shutdown();
    harness.task.await.expect("join");
}

#[tokio::test(start_paused = true)]
async fn reconciliation_advances_change_revision() {
    let clock = Arc::new(ManualClock::at("2026-03-02T16:00:00Z"));
    let transport = Arc::new(FakeTransport::default());
    let harness = start_engine_with(transport, saved(Some("Azena")), clock);
    eventually(|| harness.transport.calls().len() == 2).await;
    let mut changes = harness.handle.changes();

    let before = *changes.borrow_and_update();
    harness.transport.push(TransportEvent::GroupUpdate {
        server: "Azena".to_string(),
        group: group("Lucas", vec![legendary_sighting("Cradle of the Sea")]),
    });
    changes.changed().await.expect("reconcile pass");
    assert!(*changes.borrow_and_update() > before);

    let groups = harness.handle.groups().await.expect("groups");
    assert_eq!(sightings_of(&groups, "Lucas").len(), 1);

    harness.handle.shutdown();
    harness.task.await.expect("join");
}

#[tokio::test]
async fn rapid_selections_persist_the_last_one() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let path = temp_dir.path().join("settings.json");
    let settings = Arc::new(FileSettings::open(path));
    let transport = Arc::new(FakeTransport::default());
    let harness = start_engine_with(transport, settings.clone(), Arc::new(SystemClock));

    for round in 0..20 {
        let server = if round % 2 == 0 { "Una" } else { "Azena" };
        harness
            .handle
            .select_server(Some(REGION), Some(server))
            .expect("select");
    }
    harness.handle.groups().await.expect("round trip");

    let on_disk = |server: &str| {
        load_settings(settings.path())
            .map(|saved| saved.server.as_deref() == Some(server))
            .unwrap_or(false)
    };
    eventually(|| on_disk("Azena")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(on_disk("Azena"));
    assert_eq!(
        settings.saved_selection(),
        (Some(REGION.to_string()), Some("Azena".to_string()))
    );

    harness.handle.shutdown();
    harness.task.await.expect("join");
}
