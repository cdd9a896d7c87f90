//! Test utilities for duet - fake companions and upstream fixtures
//!
//! This module provides utilities shared by unit and integration tests:
//! - Companion models with scripted answers and timing
//! - Builders for upstream SSE and JSON bodies
//! - A config pointed at a mock upstream

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::companion::{CompanionModel, CompanionRequest};
use crate::config::Config;
use crate::proxy::AppState;

/// Companion that answers immediately with fixed text and records requests.
#[derive(Debug, Default)]
pub struct StaticCompanion {
    text: Option<String>,
    requests: Mutex<Vec<CompanionRequest>>,
}

impl StaticCompanion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A companion whose every call fails
    pub fn failing() -> Self {
        Self::default()
    }

    /// Requests seen so far, oldest first
    pub fn requests(&self) -> Vec<CompanionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompanionModel for StaticCompanion {
    async fn complete(&self, request: CompanionRequest) -> Option<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        self.text.clone()
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Companion that answers only after a delay.
#[derive(Debug)]
pub struct DelayedCompanion {
    text: String,
    delay: Duration,
}

impl DelayedCompanion {
    pub fn new(text: impl Into<String>, delay: Duration) -> Self {
        Self {
            text: text.into(),
            delay,
        }
    }
}

#[async_trait]
impl CompanionModel for DelayedCompanion {
    async fn complete(&self, _request: CompanionRequest) -> Option<String> {
        tokio::time::sleep(self.delay).await;
        Some(self.text.clone())
    }

    fn name(&self) -> &'static str {
        "delayed"
    }
}

/// One streamed delta frame carrying `content`
pub fn sse_chunk(content: &str) -> String {
    let payload = json!({
        "id": "chatcmpl-test",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000,
        "model": "test-model",
        "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
    });
    format!("data: {payload}\n\n")
}

/// A frame closing the choice with `reason`
pub fn sse_finish(reason: &str) -> String {
    let payload = json!({
        "id": "chatcmpl-test",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000,
        "model": "test-model",
        "choices": [{"index": 0, "delta": {}, "finish_reason": reason}]
    });
    format!("data: {payload}\n\n")
}

/// A complete upstream event stream: one frame per chunk, then a
/// `stop` frame and `[DONE]`
pub fn sse_body(chunks: &[&str]) -> String {
    let mut body: String = chunks.iter().map(|chunk| sse_chunk(chunk)).collect();
    body.push_str(&sse_finish("stop"));
    body.push_str("data: [DONE]\n\n");
    body
}

/// A whole-body chat completion whose only choice says `content`
pub fn chat_completion_json(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "test-model",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
    })
}

/// Config pointed at `api_base` with short timeouts
pub fn test_config(api_base: &str) -> Config {
    let mut config = Config::default();
    config.proxy.listen_addr = "127.0.0.1:0".to_string();
    config.proxy.api_base = api_base.to_string();
    config.proxy.timeout_secs = 5;
    config.proxy.connect_timeout_secs = 2;
    config.proxy.idle_timeout_secs = 5;
    config.companion.timeout_secs = 2;
    config.companion.wait_secs = 1;
    config
}

/// App state for `api_base` with the given companion and companion wait
pub fn test_state(
    api_base: &str,
    companion: Arc<dyn CompanionModel>,
    companion_wait: Duration,
) -> crate::error::Result<Arc<AppState>> {
    let mut state = AppState::new(&test_config(api_base), companion)?;
    state.companion_wait = companion_wait;
    Ok(Arc::new(state))
}
