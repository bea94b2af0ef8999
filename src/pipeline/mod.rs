//! Streaming pipeline: raw bytes → protocol events → merged result.
//!
//! ```text
//! Raw Bytes → TextDecoder → SseDecoder → ResultFragment → ResultAccumulator
//!     │            │             │              │                 │
//!   HTTP       UTF-8 with    blank-line     typed view      append content,
//!   body       carry-over    framing,       of one event    replace side
//!                            data: lines                    channels
//! ```
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`decode`] | Event-stream decoder tolerant of arbitrary chunking |
//! | [`accumulate`] | Result merge engine |

pub mod accumulate;
pub mod decode;


use crate::types::events::ProtocolEvent;
use crate::BoxStream;
use bytes::Bytes;

/// Decoder trait for stream decoding
pub trait Decoder: Send + Sync {
    /// Decode a byte stream into protocol events. The returned stream is lazy,
    /// finite and cannot be restarted.
    fn decode_stream(&self, input: BoxStream<'static, Bytes>) -> BoxStream<'static, ProtocolEvent>;
}

/// Incremental bytes → text conversion.
///
/// Network reads split multi-byte characters arbitrarily; implementations must
/// carry incomplete sequences over to the next call.
pub trait TextDecoder: Send {
    fn decode(&mut self, bytes: &[u8]) -> String;

    /// Flush whatever is still pending at end of input.
    fn finish(&mut self) -> String;
}

/// UTF-8 text decoder. Invalid sequences become U+FFFD; an incomplete
/// sequence at the end of a chunk waits for the next one.
#[derive(Debug, Default)]
pub struct Utf8TextDecoder {
    pending: Vec<u8>,
}

impl Utf8TextDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TextDecoder for Utf8TextDecoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete tail: keep it for the next chunk.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
