//! Event-stream decoder (Bytes -> ProtocolEvent)
//!
//! Frames are separated by a blank line. Inside a frame only `data:` lines
//! matter; everything else (comments, `event:`, `id:`) is ignored. The text
//! still waiting for its separator survives across reads, so a frame split at
//! any byte offset decodes exactly like an unsplit one.

use crate::pipeline::{Decoder, TextDecoder, Utf8TextDecoder};
use crate::types::events::ProtocolEvent;
use crate::BoxStream;
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::debug;

pub const DEFAULT_SEPARATOR: &str = "\n\n";
pub const DEFAULT_DATA_PREFIX: &str = "data:";
pub const DEFAULT_DONE_SIGNAL: &str = "[DONE]";

/// Blank-line framed `data:` decoder:
/// - splits by separator (default "\n\n", CRLF normalized)
/// - keeps lines starting with `prefix` (default "data:")
/// - stops on `done_signal` (default "[DONE]")
#[derive(Debug, Clone)]
pub struct SseDecoder {
    separator: String,
    prefix: String,
    done_signal: String,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            prefix: DEFAULT_DATA_PREFIX.to_string(),
            done_signal: DEFAULT_DONE_SIGNAL.to_string(),
        }
    }

    pub fn with_done_signal(mut self, done_signal: impl Into<String>) -> Self {
        self.done_signal = done_signal.into();
        self
    }

    /// Decode `input` with an explicit text decoder.
    pub fn decode_with<D>(&self, input: BoxStream<'static, Bytes>, text: D) -> BoxStream<'static, ProtocolEvent>
    where
        D: TextDecoder + 'static,
    {
        let state = DecodeState {
            input,
            text,
            framing: self.clone(),
            buffer: String::new(),
            scanned: 0,
            pending: VecDeque::new(),
            finished: false,
        };

        let stream = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(event) = st.pending.pop_front() {
                    if event.is_terminal() {
                        // Nothing after the sentinel is ever read or emitted.
                        st.finished = true;
                        st.pending.clear();
                    }
                    return Some((Ok(event), st));
                }
                if st.finished {
                    return None;
                }

                match st.input.next().await {
                    Some(Ok(chunk)) => {
                        let text = st.text.decode(&chunk);
                        st.push_text(&text);
                        st.drain_frames();
                    }
                    Some(Err(e)) => {
                        st.finished = true;
                        return Some((Err(e), st));
                    }
                    None => {
                        let tail = st.text.finish();
                        st.push_text(&tail);
                        st.drain_frames();
                        let rest = std::mem::take(&mut st.buffer);
                        if !st.sentinel_seen() {
                            st.parse_frame(&rest);
                        }
                        st.finished = true;
                    }
                }
            }
        });

        Box::pin(stream)
    }
}

impl Decoder for SseDecoder {
    fn decode_stream(&self, input: BoxStream<'static, Bytes>) -> BoxStream<'static, ProtocolEvent> {
        self.decode_with(input, Utf8TextDecoder::new())
    }
}

struct DecodeState<D> {
    input: BoxStream<'static, Bytes>,
    text: D,
    framing: SseDecoder,
    buffer: String,
    /// Prefix of `buffer` already searched without finding a separator.
    scanned: usize,
    pending: VecDeque<ProtocolEvent>,
    finished: bool,
}

impl<D> DecodeState<D> {
    fn push_text(&mut self, text: &str) {
        // Only the appended text is normalized, plus a CR left at the end of
        // the previous read that may pair up with this read's LF.
        let start = if self.buffer.ends_with('\r') {
            self.buffer.len() - 1
        } else {
            self.buffer.len()
        };
        self.buffer.push_str(text);
        if self.buffer[start..].contains("\r\n") {
            let tail = self.buffer[start..].replace("\r\n", "\n");
            self.buffer.truncate(start);
            self.buffer.push_str(&tail);
            self.scanned = self.scanned.min(start);
        }
    }

    fn sentinel_seen(&self) -> bool {
        self.pending.back().map_or(false, ProtocolEvent::is_terminal)
    }

    fn drain_frames(&mut self) {
        let mut buffer = std::mem::take(&mut self.buffer);
        let sep_len = self.framing.separator.len();
        // A separator may straddle the end of the already scanned prefix.
        let mut from = self.scanned.saturating_sub(sep_len.saturating_sub(1));
        while !buffer.is_char_boundary(from) {
            from -= 1;
        }
        let mut consumed = 0;
        while !self.sentinel_seen() {
            let Some(rel) = buffer[from..].find(self.framing.separator.as_str()) else {
                from = buffer.len();
                break;
            };
            let idx = from + rel;
            self.parse_frame(&buffer[consumed..idx]);
            consumed = idx + sep_len;
            from = consumed;
        }
        buffer.drain(..consumed);
        self.scanned = from - consumed;
        self.buffer = buffer;
    }

    fn parse_frame(&mut self, frame: &str) {
        for line in frame.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(payload) = line.strip_prefix(self.framing.prefix.as_str()) else {
                continue;
            };
            let payload = payload.trim();
            if payload == self.framing.done_signal {
                self.pending.push_back(ProtocolEvent::Done);
                return;
            }
            match serde_json::from_str::<Value>(payload) {
                Ok(v) => self.pending.push_back(ProtocolEvent::Data(v)),
                Err(e) => {
                    debug!(error = %e, line_len = payload.len(), "skipping malformed event line");
                }
            }
        }
    }
}

/// Decode with the default framing and a UTF-8 text decoder.
pub fn decode_events(input: BoxStream<'static, Bytes>) -> BoxStream<'static, ProtocolEvent> {
    SseDecoder::new().decode_stream(input)
}
