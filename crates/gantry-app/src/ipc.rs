//! Output events sent to the webview.

use gantry_bridge::{
    ExitedPayload, OutputSink, SinkError, StdoutPayload, EXITED_EVENT, STDOUT_EVENT,
};
use tauri::{AppHandle, Emitter};

/// Emits pumped output as global `stdout` / `terminal-exited` events.
pub struct TauriSink {
    app: AppHandle,
}

impl TauriSink {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl OutputSink for TauriSink {
    fn emit_stdout(&self, payload: &StdoutPayload) -> Result<(), SinkError> {
        self.app
            .emit(STDOUT_EVENT, payload.clone())
            .map_err(|e| SinkError::from(e.to_string()))
    }

    fn emit_exited(&self, payload: &ExitedPayload) -> Result<(), SinkError> {
        self.app
            .emit(EXITED_EVENT, payload.clone())
            .map_err(|e| SinkError::from(e.to_string()))
    }
}
