//! Incremental SSE frame decoding
//!
//! Upstream may flush at any byte boundary, so frames are cut on the
//! blank-line delimiter as bytes arrive rather than on transport chunks.
//!
//! SSE format:
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"delta":{},"finish_reason":"stop"}]}
//!
//! data: [DONE]
//! ```

use bytes::Bytes;
use futures::stream::Stream;
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The terminal marker frame as written on the wire
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

const DONE_PAYLOAD: &str = "[DONE]";

/// What a frame means to the injector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Any frame that is neither of the two below, including undecodable ones
    Event,
    /// A JSON frame whose first choice carries a finish reason
    FinishReason,
    /// The `[DONE]` terminal marker
    Done,
}

/// One delimited SSE unit
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    raw: String,
    payload: Option<Value>,
    kind: FrameKind,
}

impl SseFrame {
    /// Decode one frame from the bytes between two delimiters
    ///
    /// Returns `None` for blank frames.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let raw = String::from_utf8_lossy(bytes).trim().to_string();
        if raw.is_empty() {
            return None;
        }

        let data = strip_data_prefix(&raw);
        if data.trim() == DONE_PAYLOAD {
            return Some(Self {
                raw,
                payload: None,
                kind: FrameKind::Done,
            });
        }

        let payload: Option<Value> = serde_json::from_str(data).ok();
        let kind = match &payload {
            Some(value) if has_finish_reason(value) => FrameKind::FinishReason,
            _ => FrameKind::Event,
        };

        Some(Self { raw, payload, kind })
    }

    /// Frame text without its trailing delimiter
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Decoded JSON payload, if the frame carried valid JSON
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn is_done(&self) -> bool {
        self.kind == FrameKind::Done
    }

    pub fn is_finish(&self) -> bool {
        self.kind == FrameKind::FinishReason
    }

    /// Concatenated `delta.content` of every choice in the frame
    pub fn delta_content(&self) -> Option<String> {
        let choices = self.payload.as_ref()?.get("choices")?.as_array()?;
        let content: String = choices
            .iter()
            .filter_map(|choice| choice.get("delta")?.get("content")?.as_str())
            .collect();
        (!content.is_empty()).then_some(content)
    }

    /// The frame re-encoded for the wire, delimiter included
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(format!("{}\n\n", self.raw))
    }
}

/// Encode a JSON value as a single `data:` frame
pub fn data_frame(payload: &Value) -> Bytes {
    Bytes::from(format!("data: {payload}\n\n"))
}

fn strip_data_prefix(raw: &str) -> &str {
    match raw.strip_prefix("data:") {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => raw,
    }
}

fn has_finish_reason(value: &Value) -> bool {
    let Some(reason) = value
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("finish_reason"))
    else {
        return false;
    };

    match reason {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Pure incremental decoder: bytes in, frames out
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    scanned: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some((end, delimiter_len)) = find_delimiter(&self.buffer, self.scanned) {
            let unit: Vec<u8> = self.buffer.drain(..end + delimiter_len).collect();
            self.scanned = 0;
            if let Some(frame) = SseFrame::parse(&unit[..end]) {
                frames.push(frame);
            }
        }

        // A delimiter is at most 4 bytes, so only its last 3 can straddle the next chunk
        self.scanned = self.buffer.len().saturating_sub(3);
        frames
    }

    /// Flush bytes that never saw a delimiter
    pub fn finish(&mut self) -> Option<SseFrame> {
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buffer);
        SseFrame::parse(&rest)
    }
}

/// Position and length of the earliest `\n\n` or `\r\n\r\n` at or after `from`
fn find_delimiter(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    let from = from.min(buffer.len());
    buffer[from..].windows(2).enumerate().find_map(|(i, pair)| {
        let at = from + i;
        if pair == b"\n\n" {
            Some((at, 2))
        } else if pair == b"\r\n" && buffer[at + 2..].starts_with(b"\r\n") {
            Some((at, 4))
        } else {
            None
        }
    })
}

/// Frames decoded from an upstream byte stream
///
/// Ends after the inner stream ends or right after a `[DONE]` frame,
/// whichever comes first. The inner stream is not polled after that.
pub struct SseFrameStream<S> {
    inner: S,
    decoder: SseDecoder,
    pending: VecDeque<SseFrame>,
    finished: bool,
}

impl<S> SseFrameStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for SseFrameStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<SseFrame, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if let Some(frame) = this.pending.pop_front() {
                if frame.is_done() {
                    this.finished = true;
                    this.pending.clear();
                }
                return Poll::Ready(Some(Ok(frame)));
            }

            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.pending.extend(this.decoder.push(&bytes));
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    this.pending.extend(this.decoder.finish());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
