//! Typed request/response pairs for every terminal command the frontend invokes.
//!
//! Requests are internally tagged by `command` with the names the webview
//! uses (`async_write_to_pty`, `async_read_from_pty`, ...), so a raw invoke
//! payload can be decoded with serde and matched exhaustively.

use std::path::PathBuf;

use gantry_pty::SessionId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum BridgeRequest {
    /// Open a session. Without `command_line` the configured shell runs
    /// interactively; with it, the line runs through the shell and the
    /// session ends when it exits.
    OpenTerminal {
        cols: Option<u16>,
        rows: Option<u16>,
        command_line: Option<String>,
        cwd: Option<PathBuf>,
    },
    #[serde(rename = "async_write_to_pty")]
    WriteToPty {
        session: Option<SessionId>,
        data: String,
    },
    #[serde(rename = "async_read_from_pty")]
    ReadFromPty { session: Option<SessionId> },
    ResizeTerminal {
        session: Option<SessionId>,
        cols: u16,
        rows: u16,
    },
    CloseTerminal { session: Option<SessionId> },
    ListTerminals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeResponse {
    Opened(TerminalInfo),
    Written,
    /// `data` is `None` when nothing was buffered.
    Output { data: Option<String> },
    Resized { cols: u16, rows: u16 },
    /// `existed` is `false` when the session was already gone.
    Closed { existed: bool },
    Terminals { terminals: Vec<TerminalInfo> },
}

/// Snapshot of one session, as reported to the frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalInfo {
    pub session: SessionId,
    pub cols: u16,
    pub rows: u16,
    pub alive: bool,
}
