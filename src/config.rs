use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::CallError;

/// Slider range the settings UI offers for the VAD threshold
pub const RECOMMENDED_THRESHOLD_PERCENT: RangeInclusive<u32> = 5..=95;

/// Slider range the settings UI offers for the silence gate
pub const RECOMMENDED_SILENCE_TIMEOUT_MS: RangeInclusive<u64> = 500..=5000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub gateway: GatewayConfig,
    pub call: CallConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "callwire".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Agent webhook that receives finalized utterances
    pub webhook_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub threshold_percent: u32,
    pub silence_timeout_ms: u64,
    /// Polling loop period (16ms is roughly one display frame)
    pub tick_interval_ms: u64,
    /// Where live-adjusted settings are persisted
    pub settings_path: String,
    /// Start a call as soon as the service comes up
    pub auto_start: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        let settings = CallSettings::default();
        Self {
            threshold_percent: settings.threshold_percent,
            silence_timeout_ms: settings.silence_timeout_ms,
            tick_interval_ms: 16,
            settings_path: "data/call-settings.json".to_string(),
            auto_start: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Preferred input device name (default device when unset)
    pub input_device: Option<String>,
    /// Preferred output device name (default device when unset)
    pub output_device: Option<String>,
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    /// Recorder timeslice for "data available" chunks
    pub chunk_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            fft_size: 256,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            chunk_ms: 100,
        }
    }
}

impl Config {
    /// Load configuration from an optional file plus `CALLWIRE__*` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("CALLWIRE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// Live-adjustable VAD calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSettings {
    /// Loudness (0-100 scale) a sample must exceed to count as speech
    pub threshold_percent: u32,
    /// Sustained silence that finalizes an utterance
    pub silence_timeout_ms: u64,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            threshold_percent: 45,
            silence_timeout_ms: 1500,
        }
    }
}

impl From<&CallConfig> for CallSettings {
    fn from(cfg: &CallConfig) -> Self {
        Self {
            threshold_percent: cfg.threshold_percent,
            silence_timeout_ms: cfg.silence_timeout_ms,
        }
    }
}

impl CallSettings {
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }

    /// Reject values the engine cannot work with; warn on values outside the usual range
    pub fn validate(&self) -> Result<(), CallError> {
        if self.threshold_percent > 100 {
            return Err(CallError::InvalidSettings(format!(
                "threshold_percent must be between 0 and 100, got {}",
                self.threshold_percent
            )));
        }
        if self.silence_timeout_ms == 0 {
            return Err(CallError::InvalidSettings(
                "silence_timeout_ms must be positive".to_string(),
            ));
        }

        if !RECOMMENDED_THRESHOLD_PERCENT.contains(&self.threshold_percent) {
            warn!(
                "Threshold {}% is outside the recommended {}-{}% range",
                self.threshold_percent,
                RECOMMENDED_THRESHOLD_PERCENT.start(),
                RECOMMENDED_THRESHOLD_PERCENT.end()
            );
        }
        if !RECOMMENDED_SILENCE_TIMEOUT_MS.contains(&self.silence_timeout_ms) {
            warn!(
                "Silence timeout {}ms is outside the recommended {}-{}ms range",
                self.silence_timeout_ms,
                RECOMMENDED_SILENCE_TIMEOUT_MS.start(),
                RECOMMENDED_SILENCE_TIMEOUT_MS.end()
            );
        }

        Ok(())
    }
}

/// JSON file holding the last calibration the user picked
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read persisted settings, falling back when the file is missing or unusable
    pub fn load_or(&self, fallback: CallSettings) -> CallSettings {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return fallback,
            Err(e) => {
                warn!("Failed to read call settings {}: {}", self.path.display(), e);
                return fallback;
            }
        };

        match serde_json::from_str::<CallSettings>(&raw) {
            Ok(settings) if settings.validate().is_ok() => {
                info!(
                    "Loaded call settings: threshold {}%, silence {}ms",
                    settings.threshold_percent, settings.silence_timeout_ms
                );
                settings
            }
            Ok(_) => {
                warn!("Ignoring invalid call settings in {}", self.path.display());
                fallback
            }
            Err(e) => {
                warn!("Failed to parse call settings {}: {}", self.path.display(), e);
                fallback
            }
        }
    }

    pub fn save(&self, settings: &CallSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("Failed to create settings directory")?;
            }
        }

        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write call settings: {:?}", self.path))?;

        Ok(())
    }
}
