//! Per-session drain thread that moves PTY output into the session's ring.
//!
//! PTY reads are blocking, so each session gets its own dedicated OS thread.
//! The reader is owned by the thread directly rather than kept behind the
//! session lock, so a blocked read never stalls writes, resizes, or
//! frontend reads of already buffered output.

use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::session::{SessionId, Shared};

/// Start the drain loop for a session on a dedicated OS thread.
pub(crate) fn start_drain_thread(
    session_id: SessionId,
    shared: Arc<Shared>,
    reader: Box<dyn Read + Send>,
    chunk_size: usize,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("pty-drain-{session_id}"))
        .spawn(move || {
            drain_loop(&shared, reader, chunk_size);
            shared.mark_drained();
            log::debug!("session {session_id}: drain loop finished");
        })
}

fn drain_loop(shared: &Shared, mut reader: Box<dyn Read + Send>, chunk_size: usize) {
    let mut buf = vec![0u8; chunk_size.max(1)];

    loop {
        if shared.is_closed() {
            return;
        }

        // Blocks until output is available. Closing the session kills the
        // child, which closes the slave and fails this read with EIO.
        let n = match reader.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("session {}: PTY read ended: {e}", shared.id());
                return;
            }
        };

        shared.push_output(&buf[..n]);
    }
}
