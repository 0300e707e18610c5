//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use readaloud_core::EngineConfig;
use serde::{Deserialize, Serialize};

/// Environment variable that overrides the settings file location.
pub const SETTINGS_PATH_ENV: &str = "READALOUD_SETTINGS";

const MIN_PROGRESS_INTERVAL_MS: u64 = 4;
const MAX_PROGRESS_INTERVAL_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_output_device: Option<String>,
    pub default_speed: f64,
    pub progress_interval_ms: u64,
    /// Start playing as soon as the buffer is loaded.
    pub autoplay: bool,
    /// Print every progress event, not just transitions.
    pub log_progress: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_output_device: None,
            default_speed: 1.0,
            progress_interval_ms: 16,
            autoplay: true,
            log_progress: false,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.default_speed = snap_speed(self.default_speed, &EngineConfig::default().supported_speeds);
        self.progress_interval_ms = self
            .progress_interval_ms
            .clamp(MIN_PROGRESS_INTERVAL_MS, MAX_PROGRESS_INTERVAL_MS);
        self.preferred_output_device = self
            .preferred_output_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    /// Engine configuration derived from these settings.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            default_speed: self.default_speed,
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            ..EngineConfig::default()
        }
    }
}

/// Closest supported speed; 1.0 for non-finite input.
pub fn snap_speed(raw: f64, supported: &[f64]) -> f64 {
    if !raw.is_finite() {
        return 1.0;
    }
    supported
        .iter()
        .copied()
        .min_by(|a, b| (a - raw).abs().total_cmp(&(b - raw).abs()))
        .unwrap_or(1.0)
}

pub fn default_settings_path() -> PathBuf {
    if let Some(path) = std::env::var_os(SETTINGS_PATH_ENV) {
        return PathBuf::from(path);
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("readaloud")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("readaloud")
            .join("settings.json")
    }
}

/// Missing or unreadable files yield defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
