use crate::config::SettingsStore;
use crate::session::CallEngine;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Handle to the call engine driver
    pub engine: CallEngine,

    /// Where calibration changes are persisted
    pub settings_store: Arc<SettingsStore>,
}

impl AppState {
    pub fn new(engine: CallEngine, settings_store: SettingsStore) -> Self {
        Self {
            engine,
            settings_store: Arc::new(settings_store),
        }
    }
}
