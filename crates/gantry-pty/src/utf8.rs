//! Incremental UTF-8 framing for PTY output.
//!
//! A read from the PTY can end in the middle of a multi-byte character. The
//! decoder holds the incomplete tail back until the next chunk completes it,
//! so the frontend never sees a replacement character for output that was
//! merely split across reads.

/// Longest possible UTF-8 encoding of a single scalar value.
const MAX_SEQUENCE_LEN: usize = 4;

#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, prefixed with any tail held back by the previous call.
    ///
    /// Invalid sequences are replaced with U+FFFD. An incomplete sequence at
    /// the end is kept for the next call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(bytes);

        let mut out = String::with_capacity(input.len());
        let mut rest: &[u8] = &input;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // `valid_up_to` guarantees this prefix is well-formed.
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            debug_assert!(after.len() < MAX_SEQUENCE_LEN);
                            self.pending.extend_from_slice(after);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush a dangling incomplete sequence once no more input will arrive.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }

    /// Whether an incomplete sequence is being held back.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
