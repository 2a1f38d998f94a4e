//! Incremental decoding of chat-completion server-sent events.
//!
//! Bytes are buffered across chunks and only complete `\n`-terminated lines are
//! decoded, so a frame or a multi-byte character split between two reads is
//! decoded exactly once.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::FrameError;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Done,
}

/// Interprets one line of the event stream.
///
/// `Ok(None)` covers blank lines, non-data lines and frames without content.
pub fn parse_line(line: &str) -> Result<Option<SseEvent>, FrameError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return Ok(None);
    }

    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(None);
    };

    if payload == DONE_MARKER {
        return Ok(Some(SseEvent::Done));
    }

    let event: Value = serde_json::from_str(payload)?;

    if let Some(error) = event.get("error") {
        warn!(%error, "data frame carries an API error payload");
    }

    Ok(event
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
        .map(|content| SseEvent::Delta(content.to_string())))
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    saw_done: bool,
    skipped_frames: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one body chunk and returns the content deltas completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut deltas = Vec::new();
        let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            return deltas;
        };

        let complete: Vec<u8> = self.buffer.drain(..=last_newline).collect();
        for raw in complete.split(|b| *b == b'\n') {
            self.decode_line(raw, &mut deltas);
        }
        deltas
    }

    /// Flushes an unterminated last line once the body has ended.
    pub fn finish(&mut self) -> Vec<String> {
        let mut deltas = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.decode_line(&rest, &mut deltas);
        }
        deltas
    }

    pub fn saw_done(&self) -> bool {
        self.saw_done
    }

    pub fn skipped_frames(&self) -> usize {
        self.skipped_frames
    }

    fn decode_line(&mut self, raw: &[u8], deltas: &mut Vec<String>) {
        let line = String::from_utf8_lossy(raw);
        match parse_line(&line) {
            Ok(Some(SseEvent::Delta(content))) => deltas.push(content),
            Ok(Some(SseEvent::Done)) => {
                debug!("received [DONE] marker");
                self.saw_done = true;
            }
            Ok(None) => {}
            Err(e) => {
                self.skipped_frames += 1;
                debug!(error = %e, frame = %line, "skipping malformed SSE frame");
            }
        }
    }
}
