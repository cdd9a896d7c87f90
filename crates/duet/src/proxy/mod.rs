//! Chat completion proxy with companion injection

mod error;
mod inject;
mod merge;
mod messages;
mod server;
mod sse;

pub use error::{ProxyError, network_error};
pub use inject::{StreamInjector, inject_companion};
pub use merge::{
    ChoiceShape, combine_text, extract_response_text, merge_companion_text, whole_body_response,
};
pub use messages::{CompletionRequest, Message, MessageContent, extract_last_user_message};
pub use server::{
    AppState, COMPLETIONS_PATH, ProxyServer, ReplyMode, create_router, mask_credential,
    parse_request,
};
pub use sse::{DONE_FRAME, FrameKind, SseDecoder, SseFrame, SseFrameStream, data_frame};
