//! Tauri commands for terminal sessions.
//!
//! The session argument is optional everywhere; leaving it out targets the
//! most recently opened session, which is how the polling frontend works.

use std::path::PathBuf;
use std::sync::Arc;

use gantry_bridge::{pump_output, BridgeError, PumpEnd, TerminalInfo};
use gantry_pty::{SessionId, TermSize};
use tauri::{AppHandle, Manager};
use tokio::sync::mpsc;

use crate::ipc::TauriSink;
use crate::state::AppState;

/// Open a session running `command_line` through the shell, or an
/// interactive shell.
#[tauri::command]
pub async fn open_terminal(
    state: tauri::State<'_, AppState>,
    command_line: Option<String>,
    cwd: Option<PathBuf>,
    cols: Option<u16>,
    rows: Option<u16>,
) -> Result<TerminalInfo, BridgeError> {
    let reaped = state.bridge.registry().reap_finished();
    if !reaped.is_empty() {
        log::debug!("reaped finished sessions {reaped:?}");
    }

    let size = state.bridge.requested_size(cols, rows);
    let info = state.bridge.open(command_line.as_deref(), cwd, size);
    if let Err(e) = &info {
        log::error!("failed to open terminal: {e}");
    }
    info
}

#[tauri::command]
pub async fn async_write_to_pty(
    state: tauri::State<'_, AppState>,
    session: Option<SessionId>,
    data: String,
) -> Result<(), BridgeError> {
    state.bridge.write(session, &data)
}

/// Buffered output since the last call; empty when there is none.
#[tauri::command]
pub async fn async_read_from_pty(
    state: tauri::State<'_, AppState>,
    session: Option<SessionId>,
) -> Result<String, BridgeError> {
    Ok(state.bridge.read(session)?.unwrap_or_default())
}

#[tauri::command]
pub async fn resize_terminal(
    state: tauri::State<'_, AppState>,
    session: Option<SessionId>,
    cols: u16,
    rows: u16,
) -> Result<TermSize, BridgeError> {
    state.bridge.resize(session, cols, rows)
}

/// Close a session and stop its output pump. Returns whether it was open.
#[tauri::command]
pub async fn close_terminal(
    state: tauri::State<'_, AppState>,
    session: Option<SessionId>,
) -> Result<bool, BridgeError> {
    let target = session.or_else(|| state.bridge.registry().latest_id());
    let Some(id) = target else {
        return Ok(false);
    };

    // Take the sender out of the lock before awaiting.
    if let Some(stop_tx) = state.take_pump(id) {
        let _ = stop_tx.send(()).await;
    }
    Ok(state.bridge.close(Some(id)))
}

#[tauri::command]
pub async fn list_terminals(
    state: tauri::State<'_, AppState>,
) -> Result<Vec<TerminalInfo>, BridgeError> {
    Ok(state.bridge.list())
}

/// Start pushing a session's output as `stdout` events. Replaces any pump
/// already running for the session. Once the session has ended and its exit
/// was reported, it is closed and dropped from the registry.
#[tauri::command]
pub async fn subscribe_output(
    app: AppHandle,
    state: tauri::State<'_, AppState>,
    session: Option<SessionId>,
) -> Result<SessionId, BridgeError> {
    let session = state.bridge.resolve(session)?;
    let id = session.id();

    let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
    if let Some(previous) = state.insert_pump(id, stop_tx) {
        let _ = previous.send(()).await;
    }

    let sink = Arc::new(TauriSink::new(app.clone()));
    tauri::async_runtime::spawn(async move {
        let end = pump_output(session, sink, stop_rx).await;
        let state = app.state::<AppState>();
        if let PumpEnd::Exited(code) = end {
            log::info!("session {id}: exited with {code:?}");
            state.bridge.release_finished(id);
        }
        state.forget_finished_pump(id);
    });
    Ok(id)
}

/// Stop pushing output for a session. The session keeps running.
#[tauri::command]
pub async fn unsubscribe_output(
    state: tauri::State<'_, AppState>,
    session: SessionId,
) -> Result<bool, BridgeError> {
    match state.take_pump(session) {
        Some(stop_tx) => {
            let _ = stop_tx.send(()).await;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Run a command line in a fresh terminal, streaming its output as events,
/// and return its exit code once it finishes.
#[tauri::command]
pub async fn run_in_terminal(
    app: AppHandle,
    state: tauri::State<'_, AppState>,
    command_line: String,
) -> Result<Option<u32>, BridgeError> {
    let sink = Arc::new(TauriSink::new(app));
    gantry_bridge::run_in_terminal(&state.bridge, &command_line, sink).await
}
