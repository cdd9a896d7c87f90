//! Companion injection into a streamed completion
//!
//! Upstream frames are forwarded in arrival order. The companion text goes
//! out as one synthetic delta frame, right before the first finish-reason
//! frame, or right before `[DONE]` if no finish-reason frame shows up.
//! Every stream ends with exactly one `[DONE]`, synthesized if upstream
//! never sent one.

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde_json::{Map, Value, json};
use std::fmt::Display;
use std::time::Duration;
use tracing::{Span, debug, info, warn};

use crate::companion::CompanionHandle;

use super::sse::{DONE_FRAME, SseFrame, data_frame};

/// Envelope fields copied from upstream frames onto the synthetic frame
const ENVELOPE_FIELDS: &[&str] = &["id", "object", "created", "model"];

/// Per-request injection state
#[derive(Debug)]
pub struct StreamInjector {
    companion: Option<CompanionHandle>,
    wait: Duration,
    separator: String,
    main_text: String,
    envelope: Map<String, Value>,
    injected: bool,
}

impl StreamInjector {
    pub fn new(companion: CompanionHandle, wait: Duration, separator: impl Into<String>) -> Self {
        Self {
            companion: Some(companion),
            wait,
            separator: separator.into(),
            main_text: String::new(),
            envelope: Map::new(),
            injected: false,
        }
    }

    /// The assistant-role announcement sent before any upstream frame
    pub fn role_frame() -> Bytes {
        data_frame(&json!({
            "choices": [{"index": 0, "delta": {"role": "assistant"}}]
        }))
    }

    /// Bytes to write for `frame`, in order
    ///
    /// The companion is awaited here, once, on the first finish-reason or
    /// terminal frame.
    pub async fn on_frame(&mut self, frame: &SseFrame) -> Vec<Bytes> {
        if let Some(payload) = frame.payload() {
            self.remember_envelope(payload);
        }
        if let Some(delta) = frame.delta_content() {
            self.main_text.push_str(&delta);
        }

        let mut out = Vec::with_capacity(2);
        if frame.is_finish() || frame.is_done() {
            out.extend(self.companion_frame().await);
        }
        out.push(frame.to_bytes());
        out
    }

    /// Bytes that close a stream which ended without `[DONE]`
    pub async fn on_eof(&mut self) -> Vec<Bytes> {
        let mut out = Vec::with_capacity(2);
        out.extend(self.companion_frame().await);
        out.push(Bytes::from_static(DONE_FRAME.as_bytes()));
        out
    }

    /// Delta text forwarded so far
    pub fn main_text(&self) -> &str {
        &self.main_text
    }

    /// Whether the companion frame went out
    pub fn injected(&self) -> bool {
        self.injected
    }

    async fn companion_frame(&mut self) -> Option<Bytes> {
        let handle = self.companion.take()?;
        let text = handle.wait(self.wait).await.into_text()?;
        self.injected = true;
        Some(self.synthesize(&text))
    }

    fn synthesize(&self, text: &str) -> Bytes {
        let mut payload = self.envelope.clone();
        payload.insert(
            "choices".to_string(),
            json!([{
                "index": 0,
                "delta": {"content": format!("{}{}", self.separator, text)},
                "finish_reason": null,
            }]),
        );
        data_frame(&Value::Object(payload))
    }

    fn remember_envelope(&mut self, payload: &Value) {
        for field in ENVELOPE_FIELDS {
            if let Some(value) = payload.get(*field) {
                self.envelope.insert(field.to_string(), value.clone());
            }
        }
    }
}

/// Logs when the caller goes away before the stream is finished
struct DisconnectGuard {
    span: Span,
    completed: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.completed {
            warn!(parent: &self.span, "Client disconnected while streaming, abandoning upstream");
        }
    }
}

/// Turn upstream frames into the caller-facing byte stream
///
/// Dropping the returned stream drops `frames`, which stops upstream reads.
pub fn inject_companion<S, E>(
    mut frames: S,
    mut injector: StreamInjector,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static
where
    S: Stream<Item = Result<SseFrame, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let span = Span::current();

    async_stream::stream! {
        let mut guard = DisconnectGuard { span: span.clone(), completed: false };
        yield Ok::<Bytes, std::io::Error>(StreamInjector::role_frame());
        debug!(parent: &span, "Wrote initial assistant role frame");

        let mut terminated = false;
        loop {
            match tokio::time::timeout(idle_timeout, frames.next()).await {
                Ok(Some(Ok(frame))) => {
                    let done = frame.is_done();
                    for bytes in injector.on_frame(&frame).await {
                        yield Ok(bytes);
                    }
                    if done {
                        terminated = true;
                        break;
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!(parent: &span, error_type = "upstream", error_message = %e, "Error reading upstream stream");
                    break;
                }
                Ok(None) => {
                    debug!(parent: &span, "Upstream stream ended without [DONE]");
                    break;
                }
                Err(_) => {
                    warn!(parent: &span, "Upstream idle for {:?}, closing stream", idle_timeout);
                    break;
                }
            }
        }

        if !terminated {
            for bytes in injector.on_eof().await {
                yield Ok(bytes);
            }
        }

        info!(
            parent: &span,
            main_chars = injector.main_text().len(),
            companion_injected = injector.injected(),
            "Stream complete"
        );
        guard.completed = true;
    }
}
