//! Event frame decoder
//!
//! Turns the search server's chunked `text/event-stream` body into typed
//! [`StreamEvent`]s. Frames are delimited by a blank line and may be split
//! across any number of chunks, including in the middle of a UTF-8
//! character, so the decoder keeps the undecoded tail between reads.
//!
//! Payload classification, in precedence order:
//! 1. `status == "all_complete"` → [`StreamEvent::AllComplete`]
//! 2. `source` + `status`, no `location` → `SourceStatus` (or `SourceComplete`)
//! 3. `error` → `StreamError` (scoped when a `source` is present)
//! 4. `location` with a non-blank address → `LocationFound`
//!
//! Malformed frames are logged and skipped; decoding always continues.

use franchise_common::events::{CountUpdate, StreamEvent};
use franchise_common::models::{SourceStatus, SourcedLocation};
use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Blank line between frames
pub const FRAME_DELIMITER: &str = "\n\n";

/// Prefix of a frame's payload line
pub const DATA_MARKER: &str = "data:";

/// Source label used when a location names none
pub const UNKNOWN_SOURCE: &str = "Unknown";

/// Wire value of the terminal status
const ALL_COMPLETE: &str = "all_complete";

/// Longest frame excerpt written to the log
const LOG_EXCERPT_CHARS: usize = 120;

/// Incremental frame decoder for one streaming session
///
/// Not reusable across sessions: a new session gets a new decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Decoded text not yet terminated by a frame delimiter
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence
    pending_bytes: Vec<u8>,
    saw_all_complete: bool,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw chunk, returning the events of every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            warn!(bytes = chunk.len(), "Chunk received after stream end, ignoring");
            return Vec::new();
        }
        let text = self.decode_utf8(chunk);
        self.push_text(&text)
    }

    /// Feed already-decoded text
    pub fn push_str(&mut self, text: &str) -> Vec<StreamEvent> {
        if self.finished {
            warn!(bytes = text.len(), "Text received after stream end, ignoring");
            return Vec::new();
        }
        self.push_text(text)
    }

    /// Signal end of stream
    ///
    /// Decodes whatever is left in the buffer on a best-effort basis, then
    /// yields `AllComplete` unless the server already sent it. Calling it
    /// again returns nothing.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        if !self.pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.pending_bytes.clear();
            self.buffer.push_str(&tail);
        }

        let residual = std::mem::take(&mut self.buffer).replace("\r\n", "\n");
        let mut events = Vec::new();

        // Without a closing delimiter, frame boundaries are unknown; take
        // every data line on its own.
        for line in residual.lines() {
            if let Some(payload) = data_payload(line) {
                if let Some(event) = self.decode_payload(payload, true) {
                    events.push(event);
                }
            }
        }

        if !self.saw_all_complete {
            debug!("Stream ended without all_complete, completing implicitly");
            self.saw_all_complete = true;
            events.push(StreamEvent::AllComplete);
        }

        events
    }

    /// Bytes of text held back waiting for a delimiter
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + self.pending_bytes.len()
    }

    /// Whether an explicit or implicit `AllComplete` has been produced
    pub fn saw_all_complete(&self) -> bool {
        self.saw_all_complete
    }

    fn push_text(&mut self, text: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(text);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find(FRAME_DELIMITER) {
            let frame: String = self.buffer.drain(..pos + FRAME_DELIMITER.len()).collect();
            if let Some(event) = self.decode_frame(&frame[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Decode as much of the pending bytes as forms complete characters
    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        self.pending_bytes.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending_bytes.len());

        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending_bytes.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending_bytes[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for more bytes
                        None => {
                            self.pending_bytes.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid + len);
                        }
                    }
                }
            }
        }

        out
    }

    fn decode_frame(&mut self, frame: &str) -> Option<StreamEvent> {
        let data_lines: Vec<&str> = frame.lines().filter_map(data_payload).collect();
        if data_lines.is_empty() {
            if !frame.trim().is_empty() {
                debug!(frame = %excerpt(frame), "Frame without data line ignored");
            }
            return None;
        }
        let payload = data_lines.join("\n");
        self.decode_payload(&payload, false)
    }

    fn decode_payload(&mut self, payload: &str, residual: bool) -> Option<StreamEvent> {
        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                if residual {
                    debug!(error = %e, payload = %excerpt(payload), "Unparsable residual frame dropped");
                } else {
                    warn!(error = %e, payload = %excerpt(payload), "Malformed stream frame dropped");
                }
                return None;
            }
        };

        let Some(object) = value.as_object() else {
            warn!(payload = %excerpt(payload), "Stream frame payload is not an object, dropped");
            return None;
        };

        let event = classify_payload(object)?;
        if event == StreamEvent::AllComplete {
            self.saw_all_complete = true;
        }
        Some(event)
    }
}

/// Classify one frame payload by field presence
pub fn classify_payload(object: &Map<String, Value>) -> Option<StreamEvent> {
    let status = object.get("status").and_then(value_text);
    let source = object
        .get("source")
        .and_then(value_text)
        .filter(|s| !s.trim().is_empty());
    let location = object.get("location").filter(|v| !v.is_null());

    if status.as_deref() == Some(ALL_COMPLETE) {
        return Some(StreamEvent::AllComplete);
    }

    if let (Some(status), Some(source), None) = (&status, &source, location) {
        let message = object
            .get("message")
            .and_then(value_text)
            .unwrap_or_default();
        let status = SourceStatus::from_wire(status);

        if status == SourceStatus::Complete {
            return Some(StreamEvent::SourceComplete {
                source: source.clone(),
                message,
            });
        }

        let count = object
            .get("count")
            .and_then(Value::as_i64)
            .and_then(CountUpdate::from_wire);

        return Some(StreamEvent::SourceStatus {
            source: source.clone(),
            status,
            message,
            count,
        });
    }

    if let Some(error) = object.get("error").filter(|v| !v.is_null()) {
        let message = value_text(error).unwrap_or_else(|| error.to_string());
        return Some(StreamEvent::StreamError { source, message });
    }

    if let Some(location) = location {
        let Some(fields) = location.as_object() else {
            warn!("Location field is not an object, dropped");
            return None;
        };

        let address = field_ignore_case(fields, &["address"]).unwrap_or_default();
        let address = address.trim();
        if address.is_empty() {
            debug!("Skipping location with empty address");
            return None;
        }

        let phone = field_ignore_case(fields, &["phone", "phoneNumber"]).unwrap_or_default();
        let source = source
            .or_else(|| field_ignore_case(fields, &["source"]).filter(|s| !s.trim().is_empty()))
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());

        return Some(StreamEvent::LocationFound(SourcedLocation::new(
            address,
            phone.trim(),
            source,
        )));
    }

    if let Some(status) = status {
        debug!(status = %status, "Status frame without source ignored");
    } else {
        debug!("Unrecognized frame payload ignored");
    }
    None
}

/// Decode a stream of raw chunks into a stream of events
///
/// Chunk errors are passed through and end the stream; a clean end runs
/// [`FrameDecoder::finish`], so the last item of a successful stream is
/// always `AllComplete`.
pub fn decode_stream<S, B, E>(chunks: S) -> impl Stream<Item = Result<StreamEvent, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    async_stream::stream! {
        let mut decoder = FrameDecoder::new();
        futures::pin_mut!(chunks);

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in decoder.push(bytes.as_ref()) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        for event in decoder.finish() {
            yield Ok(event);
        }
    }
}

/// Payload of a `data:` line, without the marker and one optional space
fn data_payload(line: &str) -> Option<&str> {
    let line = line.trim_start();
    let rest = line.strip_prefix(DATA_MARKER)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// String or number field as text
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First non-empty field whose key matches one of `names`, ignoring case
fn field_ignore_case(fields: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        fields
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .filter_map(|(_, value)| value_text(value))
            .find(|text| !text.trim().is_empty())
    })
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= LOG_EXCERPT_CHARS {
        text.to_string()
    } else {
        let head: String = text.chars().take(LOG_EXCERPT_CHARS).collect();
        format!("{}…", head)
    }
}
