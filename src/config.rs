use crate::calendar::Calendar;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "skiptrack";
const DATA_DIR_ENV: &str = "SKIPTRACK_DATA_DIR";
const STORE_FILE: &str = "listening_stats.json";
const SKIPPED_TRACKS_FILE: &str = "skipped_tracks.json";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_use_local_time")]
    pub use_local_time: bool,
    #[serde(default = "default_skip_threshold")]
    pub skip_threshold: u32,
    #[serde(default = "default_skip_threshold_days")]
    pub skip_threshold_days: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_use_local_time() -> bool {
    true
}

fn default_skip_threshold() -> u32 {
    5
}

fn default_skip_threshold_days() -> u32 {
    7
}

fn default_log_level() -> String {
    String::from("info")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_local_time: default_use_local_time(),
            skip_threshold: default_skip_threshold(),
            skip_threshold_days: default_skip_threshold_days(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    pub fn calendar(&self) -> Calendar {
        if self.use_local_time {
            Calendar::local()
        } else {
            Calendar::utc()
        }
    }
}

pub fn data_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("neither HOME nor USERPROFILE is set")?;
    Ok(PathBuf::from(home)
        .join(".local")
        .join("share")
        .join(APP_DIR))
}

pub fn store_path() -> Result<PathBuf> {
    Ok(data_root()?.join(STORE_FILE))
}

pub fn skipped_tracks_path() -> Result<PathBuf> {
    Ok(data_root()?.join(SKIPPED_TRACKS_FILE))
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(data_root()?.join(SETTINGS_FILE))
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path()?)
}

/// Reads the settings file, writing it back when keys were missing so the
/// file on disk always lists every option.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    if !path.exists() {
        let settings = Settings::default();
        save_settings_to_path(path, &settings)?;
        return Ok(settings);
    }

    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse settings file {}", path.display()))?;
    let settings: Settings = serde_json::from_value(value.clone())
        .with_context(|| format!("invalid settings in {}", path.display()))?;

    let complete = serde_json::to_value(&settings)?;
    let missing: Vec<&str> = complete
        .as_object()
        .map(|fields| {
            fields
                .keys()
                .filter(|key| value.get(key.as_str()).is_none())
                .map(String::as_str)
                .collect()
        })
        .unwrap_or_default();
    if !missing.is_empty() {
        log::info!("adding missing settings {missing:?} to {}", path.display());
        save_settings_to_path(path, &settings)?;
    }
    Ok(settings)
}

pub fn save_settings_to_path(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Installs the `env_logger` backend. `RUST_LOG` wins over the settings level.
pub fn init_logging(settings: &Settings) {
    let env = env_logger::Env::default().default_filter_or(settings.log_level.as_str());
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}
