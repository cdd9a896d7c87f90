//! Duet - chat completion proxy that appends a companion model's answer
//!
//! Every request is forwarded to an OpenAI-compatible upstream while a
//! second, smaller call runs alongside it. The companion's text is spliced
//! into the streamed reply or merged into the whole-body reply.

pub mod companion;
pub mod config;
pub mod error;
pub mod proxy;
pub mod testing;

pub use error::DuetError;
