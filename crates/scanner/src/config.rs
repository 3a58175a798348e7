//! Scanner configuration management

use crate::manager::CaptureSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScannerConfig {
    #[serde(default)]
    pub scanner: ScannerSettings,
    #[serde(default)]
    pub capture: CaptureTimings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerSettings {
    /// Default log filter when RUST_LOG is not set
    #[serde(default = "ScannerSettings::default_log_level")]
    pub log_level: String,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl ScannerSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Capture loop timings; the defaults mirror the reader firmware cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureTimings {
    /// Delay between capture polls in milliseconds
    #[serde(default = "CaptureTimings::default_poll_delay_ms")]
    pub poll_delay_ms: u64,
    /// Polls before a shot is abandoned as failed
    #[serde(default = "CaptureTimings::default_shot_timeout_polls")]
    pub shot_timeout_polls: u32,
}

impl Default for CaptureTimings {
    fn default() -> Self {
        Self {
            poll_delay_ms: Self::default_poll_delay_ms(),
            shot_timeout_polls: Self::default_shot_timeout_polls(),
        }
    }
}

impl CaptureTimings {
    fn default_poll_delay_ms() -> u64 {
        50
    }

    fn default_shot_timeout_polls() -> u32 {
        200
    }
}

impl ScannerConfig {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("fingerscan").join("config.toml")
        } else {
            PathBuf::from("/etc/fingerscan/config.toml")
        }
    }

    /// Load from an explicit path, or from the default location
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.unwrap_or_else(Self::default_path);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load the default location, falling back to built-in defaults
    pub fn load_or_default() -> Self {
        Self::load(None).unwrap_or_default()
    }

    /// Save to `path`, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Capture settings for the orchestrator
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            poll_delay: Duration::from_millis(self.capture.poll_delay_ms),
            shot_timeout_polls: self.capture.shot_timeout_polls,
        }
    }
}
