//! Application state shared between Tauri commands and output pumps.

use std::collections::HashMap;
use std::sync::Mutex;

use gantry_bridge::Bridge;
use gantry_pty::{BridgeConfig, SessionId};
use tokio::sync::mpsc;

/// Global app state managed by Tauri.
pub struct AppState {
    pub bridge: Bridge,
    /// Stop channels for running output pumps, keyed by session.
    pumps: Mutex<HashMap<SessionId, mpsc::Sender<()>>>,
}

impl AppState {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            bridge: Bridge::new(config),
            pumps: Mutex::new(HashMap::new()),
        }
    }

    /// Record a pump's stop channel, returning the one it replaces.
    pub fn insert_pump(
        &self,
        session: SessionId,
        stop_tx: mpsc::Sender<()>,
    ) -> Option<mpsc::Sender<()>> {
        self.pumps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(session, stop_tx)
    }

    pub fn take_pump(&self, session: SessionId) -> Option<mpsc::Sender<()>> {
        self.pumps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&session)
    }

    /// Forget a pump that has returned on its own. A newer pump registered
    /// for the same session is left alone.
    pub fn forget_finished_pump(&self, session: SessionId) {
        let mut pumps = self
            .pumps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if pumps.get(&session).is_some_and(|tx| tx.is_closed()) {
            pumps.remove(&session);
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}
