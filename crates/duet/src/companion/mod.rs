//! Companion model calls
//!
//! Every proxied request also asks a second model for a short note that is
//! appended to the main answer. The companion must never hurt the main
//! request: all of its failures collapse into "no companion text".

pub mod handle;
pub mod prompt;
mod remote;

pub use handle::{CompanionHandle, CompanionOutcome};
pub use prompt::{DEFAULT_PROMPT_TEMPLATE, build_companion_prompt};
pub use remote::RemoteCompanion;

use async_trait::async_trait;

/// Model used when neither the config nor the inbound request names one
pub const DEFAULT_COMPANION_MODEL: &str = "openai/gpt-4o";

/// Inputs for one companion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompanionRequest {
    /// Most recent user message of the inbound request
    pub user_text: String,
    /// The caller's `Authorization` header, relayed verbatim
    pub authorization: Option<String>,
    /// Model identifier to ask
    pub model: String,
}

/// Trait for companion backends
///
/// Implementations swallow their own failures and report them as `None`.
#[async_trait]
pub trait CompanionModel: Send + Sync {
    /// Produce companion text for the request, or `None`
    async fn complete(&self, request: CompanionRequest) -> Option<String>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Companion-specific errors, logged and never surfaced to callers
#[derive(Debug, thiserror::Error)]
pub enum CompanionError {
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Response carried no text")]
    Empty,
}
