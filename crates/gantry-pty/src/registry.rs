use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::BridgeConfig;
use crate::pty::{PtyError, SpawnCommand, TermSize};
use crate::session::{PtySession, SessionId};

/// Owns every live PTY session, keyed by id.
///
/// The registry is shared between bridge commands and event handlers, so all
/// methods take `&self`. Sessions are handed out as `Arc`s; a session stays
/// usable by whoever holds it even after it has been removed here.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<PtySession>>>,
    next_id: AtomicU64,
    /// Most recently opened id, 0 before the first open. Outlives the
    /// session itself.
    latest_id: AtomicU64,
    config: BridgeConfig,
}

impl SessionRegistry {
    /// Create a new, empty registry.
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            latest_id: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<PtySession>>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a new session.
    ///
    /// `command` defaults to the configured shell and `size` to the
    /// configured default size. `TERM` and the configured extra environment
    /// are applied unless the command sets them itself.
    pub fn open(
        &self,
        command: Option<SpawnCommand>,
        size: Option<TermSize>,
    ) -> Result<Arc<PtySession>, PtyError> {
        let command = self.with_defaults(command);
        let size = size.unwrap_or(self.config.default_size);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(PtySession::open(id, &command, size, &self.config)?);
        self.sessions().insert(id, Arc::clone(&session));
        self.latest_id.fetch_max(id, Ordering::SeqCst);
        Ok(session)
    }

    /// The configured shell, run interactively.
    pub fn shell(&self) -> SpawnCommand {
        match &self.config.shell {
            Some(shell) => SpawnCommand::new(shell.clone()),
            None => SpawnCommand::shell(),
        }
    }

    /// A single command line run through the configured shell.
    pub fn shell_command(&self, line: &str) -> SpawnCommand {
        SpawnCommand::new(self.shell().program()).arg("-c").arg(line)
    }

    fn with_defaults(&self, command: Option<SpawnCommand>) -> SpawnCommand {
        let mut command = command.unwrap_or_else(|| self.shell());
        command = command.env_default("TERM", &self.config.term);
        for (key, value) in &self.config.env {
            command = command.env_default(key, value);
        }
        command
    }

    /// Get a session by ID.
    pub fn get(&self, id: SessionId) -> Option<Arc<PtySession>> {
        self.sessions().get(&id).cloned()
    }

    /// ID of the most recently opened session, even if it has since been
    /// closed. `None` before the first open.
    ///
    /// Serves frontends that never name a session and assume there is one.
    /// Once that session ends they must see it as ended, never be moved over
    /// to an older one.
    pub fn latest_id(&self) -> Option<SessionId> {
        match self.latest_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    /// The most recently opened session, if it is still registered.
    pub fn latest(&self) -> Option<Arc<PtySession>> {
        self.latest_id().and_then(|id| self.get(id))
    }

    /// Close and remove a session. Returns whether the ID was known.
    ///
    /// Closing an unknown or already closed session is not an error.
    pub fn close(&self, id: SessionId) -> bool {
        let removed = self.sessions().remove(&id);
        match removed {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Close every session, e.g. on application exit.
    pub fn close_all(&self) {
        let drained: Vec<Arc<PtySession>> = self.sessions().drain().map(|(_, s)| s).collect();
        for session in drained {
            session.close();
        }
    }

    /// Remove sessions whose child has exited and whose output has been
    /// fully delivered. Returns the removed IDs.
    pub fn reap_finished(&self) -> Vec<SessionId> {
        let mut sessions = self.sessions();
        let done: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, session)| session.is_exhausted())
            .map(|(id, _)| *id)
            .collect();
        for id in &done {
            if let Some(session) = sessions.remove(id) {
                session.close();
            }
        }
        done
    }

    /// List all session IDs.
    pub fn list(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions().keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}
