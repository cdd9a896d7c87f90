//! Request-scoped result cell for the companion call
//!
//! The companion runs on its own task, started as soon as the request is
//! validated. The response path reads its result once, through a bounded
//! wait. A wait that times out leaves the task running; whatever it
//! produces afterwards is dropped with the task's output.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, warn};

use super::{CompanionModel, CompanionRequest};

/// What the response path learned about the companion call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanionOutcome {
    /// The bounded wait elapsed before the companion finished
    Pending,
    /// The companion produced non-empty text
    Completed(String),
    /// The companion failed, was skipped, or produced nothing
    Failed,
}

impl CompanionOutcome {
    /// Text to append, if any. `Pending` and `Failed` both mean "nothing".
    pub fn into_text(self) -> Option<String> {
        match self {
            CompanionOutcome::Completed(text) => Some(text),
            CompanionOutcome::Pending | CompanionOutcome::Failed => None,
        }
    }
}

/// Single-slot handle to a companion result, consumed by the one read
#[derive(Debug)]
pub struct CompanionHandle {
    task: Option<JoinHandle<Option<String>>>,
}

impl CompanionHandle {
    /// Run `future` on its own task
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Option<String>> + Send + 'static,
    {
        Self {
            task: Some(tokio::spawn(future)),
        }
    }

    /// Start a companion call against `model`
    pub fn dispatch(model: Arc<dyn CompanionModel>, request: CompanionRequest) -> Self {
        debug!(companion = model.name(), "Dispatching companion call");
        let span = tracing::Span::current();
        Self::spawn(async move { model.complete(request).await }.instrument(span))
    }

    /// A handle that resolves to `Failed` without running anything
    pub fn skipped() -> Self {
        Self { task: None }
    }

    /// Wait at most `timeout` for the companion result
    pub async fn wait(self, timeout: Duration) -> CompanionOutcome {
        let Some(mut task) = self.task else {
            return CompanionOutcome::Failed;
        };

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Some(text))) if !text.trim().is_empty() => CompanionOutcome::Completed(text),
            Ok(Ok(_)) => CompanionOutcome::Failed,
            Ok(Err(e)) => {
                warn!(error_type = "companion", error_message = %e, "Companion task aborted");
                CompanionOutcome::Failed
            }
            Err(_) => {
                debug!(
                    "Companion not ready after {:?}, continuing without it",
                    timeout
                );
                CompanionOutcome::Pending
            }
        }
    }
}
