//! User settings: notification preferences and the saved server selection.
//!
//! The engine only reads notification preferences and fires-and-forgets the
//! selection. Persistence lives here so the engine never waits on disk.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::error::{Result, WatchError};

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantNotificationSetting {
    pub enabled: bool,
    /// Card names that make a sighting of this merchant worth a notification.
    #[serde(default)]
    pub cards: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserNotificationConfig {
    pub notifications_enabled: bool,
    pub notify_legendary_rapport: bool,
    pub notify_merchant_appearance: bool,
    pub sound_enabled: bool,
    pub merchants: HashMap<String, MerchantNotificationSetting>,
}

impl Default for UserNotificationConfig {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
            notify_legendary_rapport: true,
            notify_merchant_appearance: false,
            sound_enabled: true,
            merchants: HashMap::new(),
        }
    }
}

impl UserNotificationConfig {
    pub fn merchant(&self, name: &str) -> Option<&MerchantNotificationSetting> {
        self.merchants.get(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub region: Option<String>,
    pub server: Option<String>,
    pub notifications: UserNotificationConfig,
}

pub trait SettingsProvider: Send + Sync {
    fn notification_config(&self) -> UserNotificationConfig;

    /// Last persisted `(region, server)` selection.
    fn saved_selection(&self) -> (Option<String>, Option<String>);

    /// Records the selection. Failures are logged, never returned.
    fn persist_selection(&self, region: Option<&str>, server: Option<&str>);
}

/// In-memory settings. Selections are kept but never written anywhere.
#[derive(Debug, Default)]
pub struct MemorySettings {
    settings: Mutex<UserSettings>,
}

impl MemorySettings {
    pub fn new(settings: UserSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }

    pub fn set_notification_config(&self, config: UserNotificationConfig) {
        if let Ok(mut settings) = self.settings.lock() {
            settings.notifications = config;
        }
    }
}

impl SettingsProvider for MemorySettings {
    fn notification_config(&self) -> UserNotificationConfig {
        self.settings
            .lock()
            .map(|settings| settings.notifications.clone())
            .unwrap_or_default()
    }

    fn saved_selection(&self) -> (Option<String>, Option<String>) {
        self.settings
            .lock()
            .map(|settings| (settings.region.clone(), settings.server.clone()))
            .unwrap_or_default()
    }

    fn persist_selection(&self, region: Option<&str>, server: Option<&str>) {
        if let Ok(mut settings) = self.settings.lock() {
            settings.region = region.map(str::to_string);
            settings.server = server.map(str::to_string);
        }
    }
}

/// JSON-file backed settings, cached in memory after the first load.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    cached: Mutex<UserSettings>,
}

impl FileSettings {
    /// Loads settings from `path`. A missing or malformed file yields
    /// defaults so a corrupt settings file never blocks startup.
    pub fn open(path: PathBuf) -> Self {
        let cached = match load_settings(&path) {
            Ok(settings) => settings,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "Failed to load settings; using defaults");
                UserSettings::default()
            }
        };
        Self {
            path,
            cached: Mutex::new(cached),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsProvider for FileSettings {
    fn notification_config(&self) -> UserNotificationConfig {
        self.cached
            .lock()
            .map(|settings| settings.notifications.clone())
            .unwrap_or_default()
    }

    fn saved_selection(&self) -> (Option<String>, Option<String>) {
        self.cached
            .lock()
            .map(|settings| (settings.region.clone(), settings.server.clone()))
            .unwrap_or_default()
    }

    fn persist_selection(&self, region: Option<&str>, server: Option<&str>) {
        // Held across the write so the file always matches the cache.
        let Ok(mut settings) = self.cached.lock() else {
            return;
        };
        settings.region = region.map(str::to_string);
        settings.server = server.map(str::to_string);
        if let Err(err) = save_settings(&self.path, &settings) {
            warn!(error = %err, "Failed to persist server selection");
        }
    }
}

/// Returns `~/.merchant-watch/settings.json`.
pub fn default_settings_path() -> Result<PathBuf> {
    Ok(crate::config::watch_home()?.join(SETTINGS_FILE))
}

pub fn load_settings(path: &Path) -> Result<UserSettings> {
    let data = match fs_err::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(UserSettings::default())
        }
        Err(source) => {
            return Err(WatchError::Io {
                context: format!("reading settings {}", path.display()),
                source,
            })
        }
    };
    serde_json::from_slice(&data).map_err(|source| WatchError::Json {
        context: format!("parsing settings {}", path.display()),
        source,
    })
}

pub fn save_settings(path: &Path, settings: &UserSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent).map_err(|source| WatchError::Io {
            context: "creating settings directory".to_string(),
            source,
        })?;
    }
    let payload = serde_json::to_vec_pretty(settings).map_err(|source| WatchError::Json {
        context: "serializing settings".to_string(),
        source,
    })?;
    let tmp_path = path.with_extension("tmp");
    fs_err::write(&tmp_path, payload).map_err(|source| WatchError::Io {
        context: "writing settings".to_string(),
        source,
    })?;
    fs_err::rename(&tmp_path, path).map_err(|source| WatchError::Io {
        context: "committing settings".to_string(),
        source,
    })?;
    Ok(())
}
