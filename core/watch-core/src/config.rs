//! Engine runtime configuration (`~/.merchant-watch/watch.toml`).
//!
//! A missing file means defaults. A present but malformed file is an error
//! the caller may downgrade to defaults.

use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, WatchError};
use crate::schedule::DEFAULT_WINDOW_MINUTES;

const WATCH_DIR: &str = ".merchant-watch";
const CONFIG_FILE: &str = "watch.toml";
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
const MIN_TICK_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub tick_interval_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    pub window_minutes: i64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            window_minutes: DEFAULT_WINDOW_MINUTES,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub catalogue: Option<PathBuf>,
    pub settings: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub engine: EngineSection,
    pub schedule: ScheduleSection,
    pub paths: PathsSection,
}

impl WatchConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.engine.tick_interval_ms)
    }

    /// Spawn-imminent lookahead; one tick.
    pub fn spawn_lookahead(&self) -> ChronoDuration {
        ChronoDuration::milliseconds(self.engine.tick_interval_ms as i64)
    }

    pub fn window_length(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.schedule.window_minutes)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.tick_interval_ms < MIN_TICK_INTERVAL_MS {
            return Err(WatchError::ConfigInvalid {
                field: "engine.tick_interval_ms".to_string(),
                reason: format!("must be at least {}", MIN_TICK_INTERVAL_MS),
            });
        }
        if self.schedule.window_minutes <= 0 || self.schedule.window_minutes >= 24 * 60 {
            return Err(WatchError::ConfigInvalid {
                field: "schedule.window_minutes".to_string(),
                reason: "must be between 1 and 1439".to_string(),
            });
        }
        Ok(())
    }
}

/// Returns `~/.merchant-watch`.
pub fn watch_home() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(WatchError::HomeDirNotFound)?;
    Ok(home.join(WATCH_DIR))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(watch_home()?.join(CONFIG_FILE))
}

pub fn load_config(path: Option<PathBuf>) -> Result<WatchConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(WatchConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| WatchError::Io {
        context: format!("reading config {}", config_path.display()),
        source,
    })?;
    let config =
        toml::from_str::<WatchConfig>(&content).map_err(|err| WatchError::ConfigMalformed {
            path: config_path.clone(),
            details: err.to_string(),
        })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config =
            load_config(Some(temp_dir.path().join("missing.toml"))).expect("load config");
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.window_length(), ChronoDuration::minutes(25));
        assert!(config.paths.catalogue.is_none());
    }

    #[test]
    fn parses_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("watch.toml");
        fs_err::write(
            &path,
            r#"
[engine]
tick_interval_ms = 500

[schedule]
window_minutes = 30

[paths]
catalogue = "/opt/merchant-watch/catalogue.json"
"#,
        )
        .expect("write config");

        let config = load_config(Some(path)).expect("load config");
        assert_eq!(config.engine.tick_interval_ms, 500);
        assert_eq!(config.spawn_lookahead(), ChronoDuration::milliseconds(500));
        assert_eq!(config.window_length(), ChronoDuration::minutes(30));
        assert_eq!(
            config.paths.catalogue,
            Some(PathBuf::from("/opt/merchant-watch/catalogue.json"))
        );
    }

    #[test]
    fn rejects_malformed_and_out_of_range() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("watch.toml");

        fs_err::write(&path, "[engine\n").expect("write config");
        assert!(matches!(
            load_config(Some(path.clone())),
            Err(WatchError::ConfigMalformed { .. })
        ));

        fs_err::write(&path, "[engine]\ntick_interval_ms = 1\n").expect("write config");
        assert!(matches!(
            load_config(Some(path)),
            Err(WatchError::ConfigInvalid { .. })
        ));
    }
}
