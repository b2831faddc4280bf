//! Notification rendering and dispatch.
//!
//! The host environment may refuse notifications (no permission) and sound
//! playback may fail; both are logged here and never reach the caller.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::policy::{decide_found, decide_spawn, Decision};
use crate::settings::UserNotificationConfig;
use crate::store::AppearanceGroup;

const FOUND_ICON: &str = "images/notifications/ExclamationMark.png";
const SPAWN_ICON: &str = "images/notifications/QuestionMark.png";
const SPAWN_TAG: &str = "spawn_merchant";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub renotify: bool,
    pub icon: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification permission not granted")]
    PermissionDenied,
    #[error("notifications are not supported here")]
    Unsupported,
    #[error("notification failed: {0}")]
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
#[error("sound cue failed: {0}")]
pub struct SoundError(pub String);

pub trait NotificationSink: Send + Sync {
    fn notify(&self, request: &NotificationRequest) -> Result<(), NotifyError>;
}

pub trait SoundPlayer: Send + Sync {
    fn play(&self) -> Result<(), SoundError>;
}

/// Sink that drops every request; used when the host has no notification
/// surface.
#[derive(Debug, Default)]
pub struct DiscardSink;

impl NotificationSink for DiscardSink {
    fn notify(&self, _request: &NotificationRequest) -> Result<(), NotifyError> {
        Err(NotifyError::Unsupported)
    }
}

#[derive(Debug, Default)]
pub struct Silent;

impl SoundPlayer for Silent {
    fn play(&self) -> Result<(), SoundError> {
        Ok(())
    }
}

pub fn found_request(group: &AppearanceGroup) -> NotificationRequest {
    let name = group.name();
    let body = match group.sightings() {
        [single] => format!(
            "Location: {}\nCard: {}\nRapport: {}\n",
            single.zone,
            single.card.name,
            single
                .rapport_rarity
                .map(|rarity| rarity.as_str())
                .unwrap_or("_unknown")
        ),
        _ => "Conflicting merchant data, click for more information.".to_string(),
    };
    NotificationRequest {
        title: format!("Wandering Merchant \"{}\" found", name),
        body,
        tag: format!("found_{}", name),
        renotify: true,
        icon: FOUND_ICON.to_string(),
    }
}

pub fn spawn_request(group: &AppearanceGroup) -> NotificationRequest {
    let name = group.name();
    NotificationRequest {
        title: format!("Wandering Merchant \"{}\" appeared", name),
        body: format!(
            "Wandering Merchant \"{}\" is waiting for you somewhere.",
            name
        ),
        tag: SPAWN_TAG.to_string(),
        renotify: true,
        icon: SPAWN_ICON.to_string(),
    }
}

#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    sound: Arc<dyn SoundPlayer>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>, sound: Arc<dyn SoundPlayer>) -> Self {
        Self { sink, sound }
    }

    /// Applies the found policy and raises the notification when allowed.
    /// Returns whether a notification was raised.
    pub fn request_found(&self, group: &AppearanceGroup, config: &UserNotificationConfig) -> bool {
        match decide_found(group, config) {
            Decision::Found => {
                self.dispatch(&found_request(group), config);
                true
            }
            _ => false,
        }
    }

    pub fn request_spawn(&self, group: &AppearanceGroup, config: &UserNotificationConfig) -> bool {
        match decide_spawn(group, config) {
            Decision::SpawnImminent => {
                self.dispatch(&spawn_request(group), config);
                true
            }
            _ => false,
        }
    }

    /// Raises a found notification without consulting the policy. An empty
    /// group has nothing to report and is skipped.
    pub fn force_found(&self, group: &AppearanceGroup, config: &UserNotificationConfig) -> bool {
        if group.sightings().is_empty() {
            return false;
        }
        self.dispatch(&found_request(group), config);
        true
    }

    pub fn force_spawn(&self, group: &AppearanceGroup, config: &UserNotificationConfig) {
        self.dispatch(&spawn_request(group), config);
    }

    fn dispatch(&self, request: &NotificationRequest, config: &UserNotificationConfig) {
        if config.sound_enabled {
            if let Err(err) = self.sound.play() {
                debug!(error = %err, "Sound cue failed");
            }
        }
        match self.sink.notify(request) {
            Ok(()) => debug!(tag = %request.tag, "Notification raised"),
            Err(NotifyError::PermissionDenied) | Err(NotifyError::Unsupported) => {
                debug!(tag = %request.tag, "Notification not shown")
            }
            Err(err) => warn!(error = %err, tag = %request.tag, "Notification failed"),
        }
    }
}
