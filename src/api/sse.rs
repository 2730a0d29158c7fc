//! Server-Sent Events (SSE) framing and decoding for streaming responses
//!
//! Bytes arrive in arbitrary pieces; [`SseFrames`] reassembles them into
//! blank-line-delimited events and [`decode_frame`] turns one event into a
//! typed chunk. Payloads look like:
//!
//! ```text
//! data: {"id":"as-1","choices":[{"index":0,"delta":{"content":"Hi"}}]}
//!
//! data: [DONE]
//! ```

use super::streaming::{Decoded, FrameSource};
use super::{ApplicationError, QianfanError, TransportError};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// End-of-stream marker sent as the data of the final event
pub const DONE_SENTINEL: &str = "[DONE]";

pub type ByteStream<E> = Pin<Box<dyn Stream<Item = Result<Vec<u8>, E>> + Send>>;

/// Frame source over a byte stream carrying SSE events
pub struct SseFrames<E> {
    body: Option<ByteStream<E>>,
    buffer: Vec<u8>,
    idle_timeout: Option<Duration>,
    finished: bool,
}

impl<E> SseFrames<E>
where
    E: Into<QianfanError> + Send,
{
    pub fn new(body: ByteStream<E>) -> Self {
        Self {
            body: Some(body),
            buffer: Vec::new(),
            idle_timeout: None,
            finished: false,
        }
    }

    /// Fail with a timeout when no bytes arrive for `timeout`
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Pop one complete event from the buffer, if any
    fn take_frame(&mut self) -> Result<Option<String>, QianfanError> {
        match find_frame_end(&self.buffer) {
            Some((end, delimiter_len)) => {
                let rest = self.buffer.split_off(end + delimiter_len);
                let mut frame = std::mem::replace(&mut self.buffer, rest);
                frame.truncate(end);
                utf8_frame(frame).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn read_more(&mut self) -> Result<Option<Vec<u8>>, QianfanError> {
        let body = match self.body.as_mut() {
            Some(body) => body,
            None => return Ok(None),
        };
        let next = match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, body.next())
                .await
                .map_err(|_| {
                    TransportError::timeout(format!("no data received for {:?}", limit))
                })?,
            None => body.next().await,
        };
        match next {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<E> FrameSource for SseFrames<E>
where
    E: Into<QianfanError> + Send,
{
    async fn next_frame(&mut self) -> Result<Option<String>, QianfanError> {
        loop {
            if let Some(frame) = self.take_frame()? {
                return Ok(Some(frame));
            }
            if self.finished {
                return Ok(None);
            }
            match self.read_more().await? {
                Some(bytes) => self.buffer.extend_from_slice(&bytes),
                None => {
                    // The final event may lack its trailing blank line
                    self.finished = true;
                    if self.buffer.iter().all(u8::is_ascii_whitespace) {
                        self.buffer.clear();
                        return Ok(None);
                    }
                    let frame = std::mem::take(&mut self.buffer);
                    return utf8_frame(frame).map(Some);
                }
            }
        }
    }

    fn close(&mut self) {
        if self.body.take().is_some() {
            debug!(buffered = self.buffer.len(), "Released SSE body");
        }
        self.buffer.clear();
        self.finished = true;
    }
}

fn utf8_frame(bytes: Vec<u8>) -> Result<String, QianfanError> {
    String::from_utf8(bytes).map_err(|e| QianfanError::decode(format!("frame is not UTF-8: {}", e)))
}

/// Position and length of the first blank-line delimiter
fn find_frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buf.len() {
        let line_break = match buf[i] {
            b'\n' => 1,
            b'\r' if buf.get(i + 1) == Some(&b'\n') => 2,
            b'\r' => 1,
            _ => {
                i += 1;
                continue;
            }
        };
        let next = i + line_break;
        let second = match buf.get(next) {
            Some(b'\n') => 1,
            Some(b'\r') if buf.get(next + 1) == Some(&b'\n') => 2,
            Some(b'\r') if next + 1 < buf.len() => 1,
            // a trailing '\r' may still be followed by '\n'
            Some(b'\r') => return None,
            _ => {
                i = next;
                continue;
            }
        };
        return Some((i, line_break + second));
    }
    None
}

/// Fields of one SSE event
#[derive(Debug, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Split an event into its fields. Comments, `id:` and `retry:` are ignored.
///
/// A frame with no fields that reads as a JSON object is taken whole as data;
/// some error replies arrive that way, possibly spread over several lines.
pub fn parse_event(frame: &str) -> SseEvent {
    let mut event = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();
    let mut has_fields = false;

    for line in split_lines(frame) {
        // Skip empty lines and SSE comments
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        if let Some(value) = field_value(line, "data") {
            has_fields = true;
            data_lines.push(value);
        } else if let Some(value) = field_value(line, "event") {
            has_fields = true;
            event.event = Some(value.to_string());
        } else if ["id", "retry"].iter().any(|name| field_value(line, name).is_some()) {
            has_fields = true;
        }
    }

    let trimmed = frame.trim();
    event.data = if !has_fields && trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        data_lines.join("\n")
    };
    event
}

/// Lines ended by `\r\n`, `\n` or a lone `\r`, matching [`find_frame_end`]
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        match rest.find(|c: char| c == '\r' || c == '\n') {
            Some(i) => {
                let line = &rest[..i];
                let skip = if rest[i..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[i + skip..];
                Some(line)
            }
            None => Some(std::mem::take(&mut rest)),
        }
    })
}

fn field_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Decode one SSE event into a chunk of type `T`.
///
/// An embedded error object wins over any result fields in the same frame.
pub fn decode_frame<T: DeserializeOwned>(frame: &str) -> Result<Decoded<T>, QianfanError> {
    let event = parse_event(frame);
    let data = event.data.trim();

    if data.is_empty() {
        return Ok(Decoded::Skip);
    }
    if data == DONE_SENTINEL {
        return Ok(Decoded::End);
    }

    let json: Value = serde_json::from_str(data)
        .map_err(|e| QianfanError::decode(format!("JSON parse error: {}", e)))?;

    if let Some(err) = ApplicationError::from_value(&json) {
        return Err(err.into());
    }
    if event.event.as_deref() == Some("error") {
        return Err(ApplicationError::new("stream_error", data).into());
    }

    serde_json::from_value(json)
        .map(Decoded::Chunk)
        .map_err(|e| QianfanError::decode(format!("unexpected chunk shape: {}", e)))
}
