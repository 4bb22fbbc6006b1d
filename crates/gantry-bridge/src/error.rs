//! Errors surfaced to the frontend by bridge commands.

use gantry_pty::{PtyError, ReadError, WriteError};
use serde::ser::SerializeStruct;
use serde::Serialize;

#[derive(Debug)]
pub enum BridgeError {
    /// The OS could not provide a pseudo-terminal.
    PtyAllocation(String),
    /// The child process failed to start.
    Spawn(String),
    /// The session has ended or was closed. Expected during shutdown; the
    /// caller should stop polling and stop sending input.
    SessionClosed,
    /// The call named no session and none is open.
    NoSession,
    InvalidRequest(String),
    Resize(String),
    Io(std::io::Error),
}

impl BridgeError {
    /// Stable machine-readable error kind for the frontend.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::PtyAllocation(_) => "pty_allocation",
            BridgeError::Spawn(_) => "spawn",
            BridgeError::SessionClosed => "session_closed",
            BridgeError::NoSession => "no_session",
            BridgeError::InvalidRequest(_) => "invalid_request",
            BridgeError::Resize(_) => "resize",
            BridgeError::Io(_) => "io",
        }
    }

    /// Whether this error just means the terminal has gone away, as opposed
    /// to something the user should be told about.
    pub fn is_termination(&self) -> bool {
        matches!(self, BridgeError::SessionClosed)
    }
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::PtyAllocation(msg) => write!(f, "could not allocate a terminal: {msg}"),
            BridgeError::Spawn(msg) => write!(f, "could not start process: {msg}"),
            BridgeError::SessionClosed => write!(f, "terminal session has ended"),
            BridgeError::NoSession => write!(f, "no terminal session is open"),
            BridgeError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            BridgeError::Resize(msg) => write!(f, "could not resize terminal: {msg}"),
            BridgeError::Io(err) => write!(f, "terminal I/O error: {err}"),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PtyError> for BridgeError {
    fn from(err: PtyError) -> Self {
        match err {
            PtyError::AllocationFailed(msg) => BridgeError::PtyAllocation(msg),
            PtyError::SpawnFailed(msg) => BridgeError::Spawn(msg),
            PtyError::InvalidSize { cols, rows } => {
                BridgeError::InvalidRequest(format!("invalid terminal size {cols}x{rows}"))
            }
            PtyError::ResizeFailed(msg) => BridgeError::Resize(msg),
            PtyError::SessionClosed => BridgeError::SessionClosed,
            PtyError::IoError(err) => BridgeError::Io(err),
        }
    }
}

impl From<WriteError> for BridgeError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::SessionClosed => BridgeError::SessionClosed,
            WriteError::Io(err) => BridgeError::Io(err),
        }
    }
}

impl From<ReadError> for BridgeError {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::SessionClosed => BridgeError::SessionClosed,
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::InvalidRequest(err.to_string())
    }
}

/// Serialized as `{ "kind": ..., "message": ... }` so the frontend can both
/// branch on the kind and show the message in its error dialog.
impl Serialize for BridgeError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("BridgeError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}
