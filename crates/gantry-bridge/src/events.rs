//! Push delivery of terminal output, and input arriving as frontend events.
//!
//! Each subscribed session gets one pump task. The pump reads the session's
//! output subscription, frames it as UTF-8 text and hands it to an
//! [`OutputSink`] as `stdout` events, then reports the exit code once the
//! session ends. It stops early when its stop channel fires.

use std::sync::Arc;

use gantry_pty::{PtySession, SessionId, Utf8Decoder};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::bridge::Bridge;
use crate::error::BridgeError;

/// Output chunks, backend to frontend.
pub const STDOUT_EVENT: &str = "stdout";
/// Keyboard input, frontend to backend.
pub const STDIN_EVENT: &str = "stdin";
/// Emitted once when a session's output has ended.
pub const EXITED_EVENT: &str = "terminal-exited";

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StdoutPayload {
    pub session: SessionId,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitedPayload {
    pub session: SessionId,
    pub code: Option<u32>,
}

/// Body of a `stdin` event. Older frontends send the bare string; newer ones
/// name the session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StdinPayload {
    Text(String),
    Targeted {
        session: Option<SessionId>,
        data: String,
    },
}

/// Where pumped output goes. The desktop app emits window events; tests
/// collect into memory.
pub trait OutputSink: Send + Sync + 'static {
    fn emit_stdout(&self, payload: &StdoutPayload) -> Result<(), SinkError>;
    fn emit_exited(&self, payload: &ExitedPayload) -> Result<(), SinkError>;
}

/// Why a pump returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEnd {
    /// The session ended; carries the child's exit code.
    Exited(Option<u32>),
    /// The stop channel fired or its sender was dropped.
    Stopped,
    /// The sink refused an event, so nobody is listening anymore.
    SinkClosed,
}

/// Forward a session's output to `sink` until the session ends or `stop_rx`
/// fires. Stopping leaves the session running.
pub async fn pump_output<S: OutputSink + ?Sized>(
    session: Arc<PtySession>,
    sink: Arc<S>,
    mut stop_rx: mpsc::Receiver<()>,
) -> PumpEnd {
    let id = session.id();
    let mut output = match session.subscribe() {
        Ok(output) => output,
        // Already closed: still tell the frontend, so the view shows it.
        Err(_) => return report_exit(&session, &*sink, session.exit_code()),
    };
    let mut decoder = Utf8Decoder::new();

    loop {
        let chunk = tokio::select! {
            chunk = output.next() => chunk,
            _ = stop_rx.recv() => {
                log::debug!("session {id}: output pump stopped");
                return PumpEnd::Stopped;
            }
        };
        let Some(bytes) = chunk else { break };

        let data = decoder.decode(&bytes);
        if data.is_empty() {
            continue;
        }
        if let Err(e) = sink.emit_stdout(&StdoutPayload { session: id, data }) {
            log::warn!("session {id}: stdout sink failed: {e}");
            return PumpEnd::SinkClosed;
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        if let Err(e) = sink.emit_stdout(&StdoutPayload {
            session: id,
            data: tail,
        }) {
            log::warn!("session {id}: stdout sink failed: {e}");
            return PumpEnd::SinkClosed;
        }
    }

    let code = session.wait_exit().await;
    report_exit(&session, &*sink, code)
}

fn report_exit<S: OutputSink + ?Sized>(
    session: &PtySession,
    sink: &S,
    code: Option<u32>,
) -> PumpEnd {
    let id = session.id();
    if let Err(e) = sink.emit_exited(&ExitedPayload { session: id, code }) {
        log::warn!("session {id}: exit sink failed: {e}");
        return PumpEnd::SinkClosed;
    }
    log::debug!("session {id}: output ended (exit code {code:?})");
    PumpEnd::Exited(code)
}

/// Input that arrived as an event rather than a direct call. Same contract as
/// [`Bridge::write`].
pub fn emit_input(
    bridge: &Bridge,
    session: Option<SessionId>,
    data: &str,
) -> Result<(), BridgeError> {
    bridge.write(session, data)
}

/// Handle the raw JSON body of a `stdin` event.
pub fn handle_stdin(bridge: &Bridge, raw: &str) -> Result<(), BridgeError> {
    match serde_json::from_str::<StdinPayload>(raw)? {
        StdinPayload::Text(data) => emit_input(bridge, None, &data),
        StdinPayload::Targeted { session, data } => emit_input(bridge, session, &data),
    }
}
