use std::io::{ErrorKind, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use crate::config::BridgeConfig;
use crate::drain::start_drain_thread;
use crate::pty::{PtyError, PtyHandle, SpawnCommand, TermSize};
use crate::ring::OutputRing;
use crate::utf8::Utf8Decoder;

/// Unique identifier for a terminal session.
pub type SessionId = u64;

/// How long `wait_exit` keeps polling for the exit status after the output
/// stream has ended before it gives up and closes the session.
const REAP_ATTEMPTS: u32 = 50;
const REAP_INTERVAL: Duration = Duration::from_millis(20);

#[cfg(unix)]
const EIO: i32 = 5;

/// Errors from writing input to a session.
#[derive(Debug)]
pub enum WriteError {
    /// The session was closed or its child has exited. Callers should stop
    /// sending input.
    SessionClosed,
    Io(std::io::Error),
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteError::SessionClosed => write!(f, "write to closed PTY session"),
            WriteError::Io(err) => write!(f, "PTY write failed: {err}"),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::Io(err) => Some(err),
            WriteError::SessionClosed => None,
        }
    }
}

/// Errors from reading or subscribing to session output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// No more output will ever be delivered for this session.
    SessionClosed,
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::SessionClosed => write!(f, "PTY session has ended"),
        }
    }
}

impl std::error::Error for ReadError {}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between a session, its drain thread, and its subscribers.
pub(crate) struct Shared {
    id: SessionId,
    /// Master and child. `None` once the session has been closed.
    pty: Mutex<Option<PtyHandle>>,
    output: Mutex<OutputRing>,
    /// Exit code recorded when the child was reaped by `close`.
    exit_code: Mutex<Option<u32>>,
    closed: AtomicBool,
    /// Set by the drain thread after its final push.
    drained: AtomicBool,
    overflow_reported: AtomicBool,
    notify: Notify,
}

impl Shared {
    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_finished(&self) -> bool {
        self.is_closed() || self.drained.load(Ordering::SeqCst)
    }

    pub(crate) fn push_output(&self, bytes: &[u8]) {
        let evicted = lock(&self.output).push(bytes);
        if evicted > 0 && !self.overflow_reported.swap(true, Ordering::Relaxed) {
            log::warn!(
                "session {}: output buffer full, dropping oldest output ({evicted} bytes so far)",
                self.id
            );
        }
        self.notify.notify_waiters();
    }

    pub(crate) fn mark_drained(&self) {
        {
            // Flip the flag under the output lock so a reader never sees an
            // empty ring followed by `drained` while a final push is pending.
            let _ring = lock(&self.output);
            self.drained.store(true, Ordering::SeqCst);
        }
        self.notify.notify_waiters();
    }

    /// Take buffered output with `take`, or report why there is none.
    fn take_output(
        &self,
        take: impl FnOnce(&mut OutputRing) -> Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>, ReadError> {
        if self.is_closed() {
            return Err(ReadError::SessionClosed);
        }
        let mut ring = lock(&self.output);
        if let Some(bytes) = take(&mut ring) {
            return Ok(Some(bytes));
        }
        if self.drained.load(Ordering::SeqCst) {
            Err(ReadError::SessionClosed)
        } else {
            Ok(None)
        }
    }

    /// Exit code of the child, if it has exited.
    fn poll_exit(&self) -> Option<u32> {
        let mut pty = lock(&self.pty);
        match pty.as_mut() {
            Some(handle) => handle.try_wait(),
            None => *lock(&self.exit_code),
        }
    }

    async fn wait_finished(&self) {
        loop {
            let notified = self.notify.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();
            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }
}

/// One live pseudo-terminal and the process attached to it.
///
/// Output is pulled off the PTY master by a dedicated drain thread into a
/// bounded ring (see [`OutputRing`]) and delivered either by polling
/// ([`read`](Self::read)) or by subscription ([`subscribe`](Self::subscribe)).
/// Input goes straight to the master through [`write`](Self::write).
pub struct PtySession {
    id: SessionId,
    shared: Arc<Shared>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    size: Mutex<TermSize>,
    text: Mutex<Utf8Decoder>,
}

impl PtySession {
    /// Spawn `command` on a new PTY and start draining its output.
    pub fn open(
        id: SessionId,
        command: &SpawnCommand,
        size: TermSize,
        config: &BridgeConfig,
    ) -> Result<Self, PtyError> {
        let mut pty = PtyHandle::spawn(command, size)?;
        let pid = pty.process_id();
        let reader = pty.take_reader()?;
        let writer = pty.take_writer()?;

        let shared = Arc::new(Shared {
            id,
            pty: Mutex::new(Some(pty)),
            output: Mutex::new(OutputRing::new(config.buffer_capacity)),
            exit_code: Mutex::new(None),
            closed: AtomicBool::new(false),
            drained: AtomicBool::new(false),
            overflow_reported: AtomicBool::new(false),
            notify: Notify::new(),
        });

        // If this fails `shared` is dropped here, and with it the PtyHandle,
        // which kills the child.
        start_drain_thread(id, Arc::clone(&shared), reader, config.read_chunk_size)
            .map_err(|e| PtyError::SpawnFailed(format!("failed to start drain thread: {e}")))?;

        log::info!(
            "session {id}: spawned {} (pid {pid:?}) at {}x{}",
            command.program(),
            size.cols,
            size.rows
        );

        Ok(Self {
            id,
            shared,
            writer: Mutex::new(Some(writer)),
            size: Mutex::new(size),
            text: Mutex::new(Utf8Decoder::new()),
        })
    }

    /// Returns the session's unique identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Write input verbatim to the PTY master.
    ///
    /// Returns once the OS has accepted the bytes; the child may not have
    /// consumed them yet.
    pub fn write(&self, data: &[u8]) -> Result<(), WriteError> {
        if self.shared.is_finished() || self.shared.poll_exit().is_some() {
            return Err(WriteError::SessionClosed);
        }

        let mut guard = lock(&self.writer);
        let writer = guard.as_mut().ok_or(WriteError::SessionClosed)?;
        match writer.write_all(data).and_then(|()| writer.flush()) {
            Ok(()) => Ok(()),
            Err(_) if self.shared.is_finished() => Err(WriteError::SessionClosed),
            Err(e) if pty_gone(&e) => Err(WriteError::SessionClosed),
            Err(e) => Err(WriteError::Io(e)),
        }
    }

    /// Take everything buffered so far without blocking.
    ///
    /// `Ok(None)` means nothing is buffered right now. Once the child has
    /// exited, remaining output is still returned; after that (or right after
    /// [`close`](Self::close)) the result is `ReadError::SessionClosed`.
    pub fn read(&self) -> Result<Option<Vec<u8>>, ReadError> {
        self.shared.take_output(OutputRing::drain_all)
    }

    /// [`read`](Self::read) framed as UTF-8 text.
    ///
    /// Characters split across reads are held back until complete. A
    /// dangling partial character is flushed as U+FFFD once the session ends.
    pub fn read_text(&self) -> Result<Option<String>, ReadError> {
        let mut decoder = lock(&self.text);
        match self.read() {
            Ok(Some(bytes)) => {
                let text = decoder.decode(&bytes);
                Ok((!text.is_empty()).then_some(text))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                let tail = decoder.finish();
                if tail.is_empty() {
                    Err(err)
                } else {
                    Ok(Some(tail))
                }
            }
        }
    }

    /// Subscribe to output chunks as they arrive.
    ///
    /// Subscribers and [`read`](Self::read) consume from the same buffer, so a
    /// session is meant to have one consumer at a time.
    pub fn subscribe(&self) -> Result<OutputSubscription, ReadError> {
        if self.shared.is_closed() {
            return Err(ReadError::SessionClosed);
        }
        Ok(OutputSubscription {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Resize the PTY. The child receives `SIGWINCH`.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        if self.shared.is_closed() {
            return Err(PtyError::SessionClosed);
        }
        let size = TermSize::new(cols, rows).validate()?;
        {
            let pty = lock(&self.shared.pty);
            let handle = pty.as_ref().ok_or(PtyError::SessionClosed)?;
            handle.resize(size)?;
        }
        *lock(&self.size) = size;
        Ok(())
    }

    /// Tear the session down. Calling this more than once is a no-op.
    ///
    /// Kills the child if it is still running, reaps it, closes the master,
    /// discards undelivered output and wakes any subscribers.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let handle = lock(&self.shared.pty).take();
        let exit_code = handle.and_then(|mut handle| handle.kill_and_reap());
        *lock(&self.shared.exit_code) = exit_code;

        // A write blocked on a full PTY fails once the child is gone, so this
        // lock is released promptly.
        lock(&self.writer).take();
        lock(&self.shared.output).clear();
        self.shared.notify.notify_waiters();

        log::info!("session {}: closed (exit code {exit_code:?})", self.id);
    }

    /// Whether the child is running and the session has not been closed.
    pub fn is_alive(&self) -> bool {
        !self.shared.is_finished() && self.shared.poll_exit().is_none()
    }

    /// Whether no further output will be produced: the session was closed or
    /// the drain loop reached end-of-file.
    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    /// Whether the session has ended and every byte of its output has been
    /// taken, so reads can only ever report `SessionClosed` from now on.
    pub fn is_exhausted(&self) -> bool {
        self.shared.is_closed() || {
            let ring = lock(&self.shared.output);
            ring.is_empty() && self.shared.drained.load(Ordering::SeqCst)
        }
    }

    /// Exit code of the child, if it has exited.
    pub fn exit_code(&self) -> Option<u32> {
        self.shared.poll_exit()
    }

    /// Wait until the output stream ends and return the child's exit code.
    ///
    /// A child that closed its terminal but keeps running is killed.
    pub async fn wait_exit(&self) -> Option<u32> {
        self.shared.wait_finished().await;
        for _ in 0..REAP_ATTEMPTS {
            if let Some(code) = self.exit_code() {
                return Some(code);
            }
            tokio::time::sleep(REAP_INTERVAL).await;
        }
        self.close();
        self.exit_code()
    }

    pub fn size(&self) -> TermSize {
        *lock(&self.size)
    }

    /// Bytes of output dropped because nobody collected them in time.
    pub fn dropped_bytes(&self) -> u64 {
        lock(&self.shared.output).dropped_bytes()
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Ordered stream of output chunks for one session.
///
/// Dropping a subscription has no effect on the session.
pub struct OutputSubscription {
    shared: Arc<Shared>,
}

impl OutputSubscription {
    pub fn session_id(&self) -> SessionId {
        self.shared.id()
    }

    /// Wait for the next chunk. Returns `None` once the session has ended.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            let notified = self.shared.notify.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();

            match self.shared.take_output(OutputRing::pop_front) {
                Ok(Some(chunk)) => return Some(chunk),
                Ok(None) => {}
                Err(ReadError::SessionClosed) => return None,
            }
            notified.await;
        }
    }
}

/// Whether a write error means the other side of the PTY is gone.
fn pty_gone(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::BrokenPipe || is_eio(err)
}

#[cfg(unix)]
fn is_eio(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(EIO)
}

#[cfg(not(unix))]
fn is_eio(_err: &std::io::Error) -> bool {
    false
}
