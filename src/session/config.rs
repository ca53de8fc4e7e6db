use std::time::Duration;

use crate::config::{CallSettings, Config};

/// Configuration for the call engine driver
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Polling loop period
    /// Default: 16ms (one display frame at 60Hz)
    pub tick_interval: Duration,

    /// Calibration in effect until the caller changes it
    pub settings: CallSettings,

    /// Capacity of the caller command queue
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(16),
            settings: CallSettings::default(),
            command_buffer: 32,
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            tick_interval: Duration::from_millis(cfg.call.tick_interval_ms.max(1)),
            settings: CallSettings::from(&cfg.call),
            ..Self::default()
        }
    }
}
