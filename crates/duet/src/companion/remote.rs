//! Remote companion using the upstream's OpenAI-compatible API
//!
//! Sends one non-streaming chat completion per request, with a low token
//! ceiling and its own absolute timeout.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{CompanionConfig, ProxyConfig};
use crate::error::{DuetError, Result};
use crate::proxy::extract_response_text;

use super::prompt::build_companion_prompt;
use super::{CompanionError, CompanionModel, CompanionRequest};

/// Companion backed by an OpenAI-compatible HTTP endpoint
#[derive(Debug)]
pub struct RemoteCompanion {
    client: Client,
    url: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    prompt_template: String,
}

/// OpenAI-compatible chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

/// Message in the chat completion request
#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

impl RemoteCompanion {
    /// Create a companion that talks to the same API family as the upstream
    pub fn new(proxy: &ProxyConfig, config: &CompanionConfig) -> Result<Self> {
        let client = Client::builder()
            .no_proxy()
            .timeout(config.timeout())
            .connect_timeout(proxy.connect_timeout())
            .build()
            .map_err(|e| DuetError::Proxy(format!("Failed to create companion client: {e}")))?;

        info!(
            "RemoteCompanion initialized with url: {}, temperature: {}, timeout: {:?}",
            proxy.completions_url(),
            config.temperature,
            config.timeout()
        );

        Ok(Self {
            client,
            url: proxy.completions_url(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout(),
            prompt_template: config.prompt_template.clone(),
        })
    }

    async fn call_api(&self, request: &CompanionRequest) -> std::result::Result<String, CompanionError> {
        let prompt = build_companion_prompt(&self.prompt_template, &request.user_text);
        debug!("Companion prompt: {}", prompt);

        let body = ChatCompletionRequest {
            model: &request.model,
            messages: vec![Message {
                role: "user",
                content: &prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let mut builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(auth) = &request.authorization {
            builder = builder.header("Authorization", auth);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CompanionError::Timeout(self.timeout)
            } else {
                CompanionError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(CompanionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                CompanionError::Timeout(self.timeout)
            } else {
                CompanionError::Parse(e.to_string())
            }
        })?;

        // A success body with no choice text is no answer, not raw JSON to append
        extract_response_text(&data)
            .filter(|text| !text.trim().is_empty())
            .ok_or(CompanionError::Empty)
    }
}

#[async_trait]
impl CompanionModel for RemoteCompanion {
    async fn complete(&self, request: CompanionRequest) -> Option<String> {
        if request.user_text.is_empty() {
            debug!("No user text, skipping companion call");
            return None;
        }

        info!(model = %request.model, "Starting companion call");
        match self.call_api(&request).await {
            Ok(text) => {
                info!("Companion call finished ({} chars)", text.len());
                Some(text)
            }
            Err(e) => {
                warn!(
                    error_type = "companion",
                    error_message = %e,
                    "Companion call failed, continuing without companion text"
                );
                None
            }
        }
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
