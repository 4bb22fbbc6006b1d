use std::io::{Read, Write};
use std::path::PathBuf;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use serde::{Deserialize, Serialize};

/// Errors from PTY operations.
#[derive(Debug)]
pub enum PtyError {
    /// The OS could not provide a pseudo-terminal pair.
    AllocationFailed(String),
    /// The child process could not be started.
    SpawnFailed(String),
    /// Requested terminal dimensions were zero.
    InvalidSize { cols: u16, rows: u16 },
    ResizeFailed(String),
    /// The session this operation targeted has already been closed.
    SessionClosed,
    IoError(std::io::Error),
}

impl std::fmt::Display for PtyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PtyError::AllocationFailed(msg) => write!(f, "PTY allocation failed: {msg}"),
            PtyError::SpawnFailed(msg) => write!(f, "PTY spawn failed: {msg}"),
            PtyError::InvalidSize { cols, rows } => {
                write!(f, "invalid terminal size {cols}x{rows}")
            }
            PtyError::ResizeFailed(msg) => write!(f, "PTY resize failed: {msg}"),
            PtyError::SessionClosed => write!(f, "PTY session is closed"),
            PtyError::IoError(err) => write!(f, "PTY I/O error: {err}"),
        }
    }
}

impl std::error::Error for PtyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PtyError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PtyError {
    fn from(err: std::io::Error) -> Self {
        PtyError::IoError(err)
    }
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Reject zero-sized terminals, which some platforms refuse to allocate.
    pub fn validate(self) -> Result<Self, PtyError> {
        if self.cols == 0 || self.rows == 0 {
            return Err(PtyError::InvalidSize {
                cols: self.cols,
                rows: self.rows,
            });
        }
        Ok(self)
    }

    fn as_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 160, rows: 80 }
    }
}

/// What to run on the slave side of a new PTY.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnCommand {
    program: Option<String>,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl SpawnCommand {
    /// The user's default shell, run interactively.
    pub fn shell() -> Self {
        Self::default()
    }

    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: Some(program.into()),
            ..Self::default()
        }
    }

    /// Run a single command line through the default shell (`$SHELL -c line`).
    pub fn shell_command(line: impl Into<String>) -> Self {
        Self::new(default_shell()).arg("-c").arg(line)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set an environment variable, replacing an earlier value for the same key.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.env.retain(|(k, _)| *k != key);
        self.env.push((key, value.into()));
        self
    }

    /// Set an environment variable only if the command does not set it already.
    pub fn env_default(self, key: &str, value: &str) -> Self {
        if self.env.iter().any(|(k, _)| k == key) {
            self
        } else {
            self.env(key, value)
        }
    }

    /// The program that will be executed, resolving the default shell.
    pub fn program(&self) -> String {
        self.program.clone().unwrap_or_else(default_shell)
    }

    pub fn has_program(&self) -> bool {
        self.program.is_some()
    }

    fn to_builder(&self) -> CommandBuilder {
        let mut builder = CommandBuilder::new(self.program());
        builder.args(&self.args);
        if let Some(dir) = &self.cwd {
            builder.cwd(dir);
        }
        for (key, value) in &self.env {
            builder.env(key, value);
        }
        builder
    }
}

/// Owns a portable-pty child process, master pair, reader, and writer.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    /// `None` once moved out by [`take_reader`](Self::take_reader).
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
    exit_code: Option<u32>,
}

impl PtyHandle {
    /// Open a PTY pair and spawn `command` on its slave side.
    pub fn spawn(command: &SpawnCommand, size: TermSize) -> Result<Self, PtyError> {
        let size = size.validate()?;
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(size.as_pty_size())
            .map_err(|e| PtyError::AllocationFailed(format!("failed to open PTY: {e}")))?;

        let child = pair
            .slave
            .spawn_command(command.to_builder())
            .map_err(|e| {
                PtyError::SpawnFailed(format!("failed to spawn {}: {e}", command.program()))
            })?;

        // Release our copy of the slave so the master sees EOF once the child
        // (and anything it forked) has exited.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to take writer: {e}")))?;

        Ok(Self {
            master: pair.master,
            reader: Some(reader),
            writer: Some(writer),
            child,
            exit_code: None,
        })
    }

    /// Resize the PTY to new dimensions. The child receives `SIGWINCH`.
    pub fn resize(&self, size: TermSize) -> Result<(), PtyError> {
        let size = size.validate()?;
        self.master
            .resize(size.as_pty_size())
            .map_err(|e| PtyError::ResizeFailed(format!("{e}")))
    }

    /// Move the blocking reader out of the handle.
    ///
    /// The reader is meant to be owned by a dedicated I/O thread; afterwards
    /// [`read`](Self::read) fails.
    pub fn take_reader(&mut self) -> Result<Box<dyn Read + Send>, PtyError> {
        self.reader.take().ok_or_else(|| taken("reader"))
    }

    /// Move the writer out of the handle; afterwards [`write`](Self::write)
    /// fails.
    pub fn take_writer(&mut self) -> Result<Box<dyn Write + Send>, PtyError> {
        self.writer.take().ok_or_else(|| taken("writer"))
    }

    /// Write bytes to the PTY master (user input -> child).
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        let writer = self.writer.as_mut().ok_or_else(|| taken("writer"))?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Blocking read from the PTY master (child output -> us).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, PtyError> {
        let reader = self.reader.as_mut().ok_or_else(|| taken("reader"))?;
        Ok(reader.read(buf)?)
    }

    /// Check if the child process is still alive.
    pub fn is_alive(&mut self) -> bool {
        self.try_wait().is_none()
    }

    /// Get the child process exit status if it has exited.
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Option<u32> {
        if self.exit_code.is_none() {
            if let Ok(Some(status)) = self.child.try_wait() {
                self.exit_code = Some(status.exit_code());
            }
        }
        self.exit_code
    }

    /// Terminate the child if it is still running and reap it.
    ///
    /// Returns the exit code, or `None` if the child could not be reaped.
    pub fn kill_and_reap(&mut self) -> Option<u32> {
        if self.try_wait().is_some() {
            return self.exit_code;
        }
        if let Err(e) = self.child.kill() {
            log::debug!("kill failed (child may have exited already): {e}");
        }
        match self.child.wait() {
            Ok(status) => self.exit_code = Some(status.exit_code()),
            Err(e) => log::warn!("failed to reap PTY child: {e}"),
        }
        self.exit_code
    }

    pub fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }
}

fn taken(what: &str) -> PtyError {
    PtyError::IoError(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        format!("PTY {what} has been moved out"),
    ))
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        self.kill_and_reap();
    }
}

/// Returns the user's default shell, falling back to `/bin/sh`.
pub(crate) fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    fn sh() -> SpawnCommand {
        SpawnCommand::new("/bin/sh")
    }

    #[test]
    fn test_spawn_pty() {
        let handle = PtyHandle::spawn(&sh(), TermSize::new(80, 24));
        assert!(handle.is_ok(), "Failed to spawn PTY: {:?}", handle.err());
        let mut handle = handle.unwrap();
        assert!(handle.is_alive());
        assert!(handle.process_id().is_some());
    }

    #[test]
    fn test_spawn_missing_program() {
        let result = PtyHandle::spawn(
            &SpawnCommand::new("/nonexistent/gantry-no-such-binary"),
            TermSize::new(80, 24),
        );
        match result {
            Err(PtyError::SpawnFailed(msg)) => assert!(msg.contains("gantry-no-such-binary")),
            Err(other) => panic!("expected SpawnFailed, got {other}"),
            Ok(_) => panic!("spawning a missing program should fail"),
        }
    }

    #[test]
    fn test_zero_size_rejected() {
        let result = PtyHandle::spawn(&sh(), TermSize::new(0, 24));
        assert!(matches!(
            result,
            Err(PtyError::InvalidSize { cols: 0, rows: 24 })
        ));
    }

    #[test]
    fn test_write_read_echo() {
        let mut handle = PtyHandle::spawn(&sh(), TermSize::new(80, 24)).unwrap();

        handle.write(b"echo GANTRY_TEST_OK\n").unwrap();

        let mut output = Vec::new();
        let mut buf = [0u8; 4096];
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            match handle.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    output.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&output);
                    if text.contains("GANTRY_TEST_OK") {
                        break;
                    }
                }
            }
        }

        let text = String::from_utf8_lossy(&output);
        assert!(
            text.contains("GANTRY_TEST_OK"),
            "Expected output to contain GANTRY_TEST_OK, got: {text}"
        );
    }

    #[test]
    fn test_read_write_fail_after_take() {
        let mut handle = PtyHandle::spawn(&SpawnCommand::new("cat"), TermSize::new(80, 24)).unwrap();
        let _reader = handle.take_reader().unwrap();
        let _writer = handle.take_writer().unwrap();

        assert!(matches!(handle.write(b"lost"), Err(PtyError::IoError(_))));
        let mut buf = [0u8; 16];
        assert!(matches!(handle.read(&mut buf), Err(PtyError::IoError(_))));
        assert!(handle.take_reader().is_err());
        assert!(handle.take_writer().is_err());
    }

    #[test]
    fn test_resize() {
        let handle = PtyHandle::spawn(&sh(), TermSize::new(80, 24)).unwrap();
        let result = handle.resize(TermSize::new(120, 40));
        assert!(result.is_ok(), "Resize failed: {:?}", result.err());
        assert!(handle.resize(TermSize::new(120, 0)).is_err());
    }

    #[test]
    fn test_child_exit() {
        let mut handle =
            PtyHandle::spawn(&SpawnCommand::shell_command("exit 3"), TermSize::new(80, 24))
                .unwrap();

        // The PTY reader blocks, so drain it in a background thread until the
        // slave closes.
        let mut reader = handle.take_reader().unwrap();
        let drain = thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        });
        let _ = drain.join();

        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline && handle.try_wait().is_none() {
            thread::sleep(Duration::from_millis(20));
        }

        assert_eq!(handle.try_wait(), Some(3));
        assert!(!handle.is_alive());
    }

    #[test]
    fn test_kill_and_reap_running_child() {
        let mut handle = PtyHandle::spawn(&SpawnCommand::new("cat"), TermSize::new(80, 24)).unwrap();
        assert!(handle.is_alive());
        assert!(handle.kill_and_reap().is_some());
        assert!(!handle.is_alive());
        // Second call is a no-op on an already reaped child.
        assert_eq!(handle.kill_and_reap(), handle.try_wait());
    }

    #[test]
    fn test_spawn_command_env_and_args() {
        let cmd = SpawnCommand::new("prog")
            .args(["a", "b"])
            .env("TERM", "dumb")
            .env("TERM", "xterm-256color")
            .env_default("TERM", "vt100")
            .env_default("LANG", "C.UTF-8");
        assert_eq!(cmd.program(), "prog");
        assert_eq!(cmd.args, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            cmd.env,
            vec![
                ("TERM".to_string(), "xterm-256color".to_string()),
                ("LANG".to_string(), "C.UTF-8".to_string()),
            ]
        );
    }

    #[test]
    fn test_shell_command_uses_dash_c() {
        let cmd = SpawnCommand::shell_command("echo hi");
        assert_eq!(cmd.program(), default_shell());
        assert_eq!(cmd.args, vec!["-c".to_string(), "echo hi".to_string()]);
    }

    #[test]
    fn test_default_shell_detection() {
        let shell = default_shell();
        assert!(!shell.is_empty(), "Default shell should not be empty");
        assert!(
            shell.starts_with('/'),
            "Default shell should be an absolute path, got: {shell}"
        );
    }
}
