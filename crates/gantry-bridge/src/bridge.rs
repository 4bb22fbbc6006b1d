use std::path::PathBuf;
use std::sync::Arc;

use gantry_pty::{
    BridgeConfig, OutputSubscription, PtySession, SessionId, SessionRegistry, TermSize,
};

use crate::error::BridgeError;
use crate::request::{BridgeRequest, BridgeResponse, TerminalInfo};

/// Command surface between the frontend and the session registry.
///
/// Calls that take an `Option<SessionId>` target the most recently opened
/// session when none is named, for frontends that treat the terminal as a
/// single global. Once that session ends such calls report it as closed;
/// they never move over to an older session.
pub struct Bridge {
    registry: SessionRegistry,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            registry: SessionRegistry::new(config),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Look up the session a call refers to.
    ///
    /// A named session that no longer exists counts as closed, since the
    /// frontend only learns ids from sessions it opened.
    pub fn resolve(&self, session: Option<SessionId>) -> Result<Arc<PtySession>, BridgeError> {
        let id = match session {
            Some(id) => id,
            None => self.registry.latest_id().ok_or(BridgeError::NoSession)?,
        };
        self.registry.get(id).ok_or(BridgeError::SessionClosed)
    }

    /// The size to open with when the caller gave all, part or none of one.
    /// A missing half comes from the configured default.
    pub fn requested_size(&self, cols: Option<u16>, rows: Option<u16>) -> Option<TermSize> {
        if cols.is_none() && rows.is_none() {
            return None;
        }
        let default = self.registry.config().default_size;
        Some(TermSize::new(
            cols.unwrap_or(default.cols),
            rows.unwrap_or(default.rows),
        ))
    }

    /// Open a session running `command_line` through the configured shell,
    /// or an interactive shell when `None`.
    pub fn open(
        &self,
        command_line: Option<&str>,
        cwd: Option<PathBuf>,
        size: Option<TermSize>,
    ) -> Result<TerminalInfo, BridgeError> {
        let size = size.map(TermSize::validate).transpose()?;
        let mut command = match command_line {
            Some(line) => self.registry.shell_command(line),
            None => self.registry.shell(),
        };
        if let Some(dir) = cwd {
            command = command.cwd(dir);
        }
        let session = self.registry.open(Some(command), size)?;
        Ok(info(&session))
    }

    pub fn write(&self, session: Option<SessionId>, data: &str) -> Result<(), BridgeError> {
        self.resolve(session)?.write(data.as_bytes())?;
        Ok(())
    }

    /// Everything buffered since the last read, as text. `Ok(None)` when
    /// nothing is waiting.
    ///
    /// The first read that finds the session ended and fully delivered also
    /// closes it and drops it from the registry.
    pub fn read(&self, session: Option<SessionId>) -> Result<Option<String>, BridgeError> {
        let session = self.resolve(session)?;
        match session.read_text() {
            Ok(data) => Ok(data),
            Err(err) => {
                self.release_finished(session.id());
                Err(err.into())
            }
        }
    }

    /// Close and drop a session that has ended and whose output has all been
    /// delivered. Returns whether it was released.
    pub fn release_finished(&self, id: SessionId) -> bool {
        match self.registry.get(id) {
            Some(session) if session.is_exhausted() => {
                log::debug!("session {id}: output fully delivered, releasing");
                self.registry.close(id)
            }
            _ => false,
        }
    }

    pub fn resize(
        &self,
        session: Option<SessionId>,
        cols: u16,
        rows: u16,
    ) -> Result<TermSize, BridgeError> {
        let session = self.resolve(session)?;
        session.resize(cols, rows)?;
        Ok(session.size())
    }

    /// Close a session. Closing one that is already gone is not an error.
    pub fn close(&self, session: Option<SessionId>) -> bool {
        match session.or_else(|| self.registry.latest_id()) {
            Some(id) => self.registry.close(id),
            None => false,
        }
    }

    pub fn subscribe(&self, session: Option<SessionId>) -> Result<OutputSubscription, BridgeError> {
        Ok(self.resolve(session)?.subscribe()?)
    }

    pub fn list(&self) -> Vec<TerminalInfo> {
        self.registry
            .list()
            .into_iter()
            .filter_map(|id| self.registry.get(id))
            .map(|session| info(&session))
            .collect()
    }

    /// Run one decoded request.
    pub fn dispatch(&self, request: BridgeRequest) -> Result<BridgeResponse, BridgeError> {
        match request {
            BridgeRequest::OpenTerminal {
                cols,
                rows,
                command_line,
                cwd,
            } => {
                let size = self.requested_size(cols, rows);
                let info = self.open(command_line.as_deref(), cwd, size)?;
                Ok(BridgeResponse::Opened(info))
            }
            BridgeRequest::WriteToPty { session, data } => {
                self.write(session, &data)?;
                Ok(BridgeResponse::Written)
            }
            BridgeRequest::ReadFromPty { session } => {
                let data = self.read(session)?;
                Ok(BridgeResponse::Output { data })
            }
            BridgeRequest::ResizeTerminal { session, cols, rows } => {
                let size = self.resize(session, cols, rows)?;
                Ok(BridgeResponse::Resized {
                    cols: size.cols,
                    rows: size.rows,
                })
            }
            BridgeRequest::CloseTerminal { session } => Ok(BridgeResponse::Closed {
                existed: self.close(session),
            }),
            BridgeRequest::ListTerminals => Ok(BridgeResponse::Terminals {
                terminals: self.list(),
            }),
        }
    }

    /// Decode a JSON request and run it.
    pub fn dispatch_json(&self, json: &str) -> Result<BridgeResponse, BridgeError> {
        let request: BridgeRequest = serde_json::from_str(json)?;
        self.dispatch(request)
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

fn info(session: &PtySession) -> TerminalInfo {
    let size = session.size();
    TerminalInfo {
        session: session.id(),
        cols: size.cols,
        rows: size.rows,
        alive: session.is_alive(),
    }
}
