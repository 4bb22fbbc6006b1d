//! Bounded FIFO of PTY output chunks.
//!
//! Output that nobody collects must not grow without bound in a long-running
//! terminal, so the ring holds at most `capacity` bytes and drops the oldest
//! bytes when a push would exceed it. Dropped output is lost for good; the
//! count is kept so callers can report it.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct OutputRing {
    chunks: VecDeque<Vec<u8>>,
    len: usize,
    capacity: usize,
    dropped: u64,
}

impl OutputRing {
    /// Create a ring holding at most `capacity` bytes (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            len: 0,
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Append a chunk, evicting the oldest bytes on overflow.
    ///
    /// Returns the number of bytes evicted by this push.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }

        if bytes.len() >= self.capacity {
            let evicted = self.len + (bytes.len() - self.capacity);
            self.chunks.clear();
            self.chunks
                .push_back(bytes[bytes.len() - self.capacity..].to_vec());
            self.len = self.capacity;
            self.dropped += evicted as u64;
            return evicted;
        }

        self.chunks.push_back(bytes.to_vec());
        self.len += bytes.len();

        let mut evicted = 0;
        while self.len > self.capacity {
            let excess = self.len - self.capacity;
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if front.len() <= excess {
                let removed = front.len();
                self.chunks.pop_front();
                self.len -= removed;
                evicted += removed;
            } else {
                front.drain(..excess);
                self.len -= excess;
                evicted += excess;
            }
        }
        self.dropped += evicted as u64;
        evicted
    }

    /// Remove and return the oldest chunk.
    pub fn pop_front(&mut self) -> Option<Vec<u8>> {
        let chunk = self.chunks.pop_front()?;
        self.len -= chunk.len();
        Some(chunk)
    }

    /// Remove everything buffered, coalesced into a single chunk.
    pub fn drain_all(&mut self) -> Option<Vec<u8>> {
        match self.chunks.len() {
            0 => None,
            1 => self.pop_front(),
            _ => {
                let mut out = Vec::with_capacity(self.len);
                for chunk in self.chunks.drain(..) {
                    out.extend_from_slice(&chunk);
                }
                self.len = 0;
                Some(out)
            }
        }
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total bytes evicted over the ring's lifetime.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped
    }
}
