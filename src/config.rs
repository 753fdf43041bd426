use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "soundstage";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub smoothing: f32,
    pub high_band_gain: f32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            smoothing: 0.8,
            high_band_gain: 1.5,
        }
    }
}

/// Engine tunables. Playback state itself is never written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub reconcile_interval_ms: u64,
    pub frame_interval_ms: u64,
    pub initial_volume: f32,
    pub seek_step_seconds: u16,
    pub analysis: AnalysisSettings,
    pub catalog_path: Option<PathBuf>,
    pub media_root: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: 100,
            frame_interval_ms: 16,
            initial_volume: 1.0,
            seek_step_seconds: 5,
            analysis: AnalysisSettings::default(),
            catalog_path: None,
            media_root: None,
        }
    }
}

impl Settings {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms.max(10))
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("SOUNDSTAGE_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("neither HOME nor USERPROFILE is set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(config_root()?.join(SETTINGS_FILE))
}

pub fn ensure_config_dir() -> Result<PathBuf> {
    let root = config_root()?;
    fs::create_dir_all(&root).with_context(|| format!("failed to create {}", root.display()))?;
    Ok(root)
}

/// Reads the settings file. On first run the defaults are written out so
/// there is a file to edit.
pub fn load_settings() -> Result<Settings> {
    let path = settings_path()?;
    load_settings_from_path(&path)
}

fn load_settings_from_path(path: &Path) -> Result<Settings> {
    if !path.exists() {
        let settings = Settings::default();
        if let Err(err) = save_settings_to_path(path, &settings) {
            tracing::warn!(error = %format!("{err:#}"), "could not write default settings");
        }
        return Ok(settings);
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    let settings: Settings = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse settings file {}", path.display()))?;
    Ok(settings)
}

fn save_settings_to_path(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
