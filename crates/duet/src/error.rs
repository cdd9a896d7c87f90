//! Error types for Duet

use thiserror::Error;

/// Main error type for Duet operations
#[derive(Error, Debug)]
pub enum DuetError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Proxy/HTTP errors
    #[error("Proxy error: {0}")]
    Proxy(String),
}

/// Result type alias for Duet operations
pub type Result<T> = std::result::Result<T, DuetError>;
