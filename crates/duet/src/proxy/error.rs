//! Error handling for proxy operations
//!
//! Strategy:
//! - Request errors: 400 with a JSON error body
//! - Unknown routes: 404 with a JSON error body
//! - Upstream errors: upstream status and body, passed through as-is
//! - Network errors and unusable upstream bodies: 502
//! - Anything else: 500
//!
//! Companion failures never reach this type; they are absorbed in
//! [`crate::companion`].

use axum::{
    body::Body,
    http::{Response, StatusCode, header},
    response::IntoResponse,
};
use bytes::Bytes;
use thiserror::Error;

/// Errors that end a proxied request before any bytes were streamed
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    /// Body missing or not a JSON object
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Path not served by the proxy
    #[error("Not found: {0}")]
    NotFound(String),

    /// Upstream answered with a non-success status
    #[error("Upstream error: {status}")]
    Upstream { status: StatusCode, body: Bytes },

    /// Connection, timeout, or read failure talking to upstream
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream answered 2xx with a body the proxy cannot interpret
    #[error("Invalid upstream response: {0}")]
    InvalidUpstreamResponse(String),

    /// Any other fault while orchestrating the request
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// HTTP status written to the caller
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::Upstream { status, .. } => *status,
            ProxyError::Network(_) | ProxyError::InvalidUpstreamResponse(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ProxyError::BadRequest(_) => "request",
            ProxyError::NotFound(_) => "not_found",
            ProxyError::Upstream { .. } => "upstream",
            ProxyError::Network(_) => "network",
            ProxyError::InvalidUpstreamResponse(_) => "upstream_body",
            ProxyError::Internal(_) => "internal",
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ProxyError::BadRequest(_) => "invalid_request_error",
            ProxyError::NotFound(_) => "not_found",
            ProxyError::Upstream { .. } => "upstream_error",
            ProxyError::Network(_) | ProxyError::InvalidUpstreamResponse(_) => "proxy_error",
            ProxyError::Internal(_) => "internal_error",
        }
    }

    /// Convert to an HTTP response for the caller
    pub fn into_response(self) -> Response<Body> {
        let status = self.status();
        let body = match self {
            ProxyError::Upstream { body, .. } => body,
            other => {
                let error_body = serde_json::json!({
                    "error": {
                        "type": other.error_type(),
                        "message": other.to_string(),
                    }
                });
                Bytes::from(error_body.to_string())
            }
        };

        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap_or_else(|_| {
                let mut response = Response::new(Body::empty());
                *response.status_mut() = status;
                response
            })
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        self.into_response()
    }
}

/// Map a reqwest failure to a network error with a readable cause
pub fn network_error(e: reqwest::Error) -> ProxyError {
    if e.is_timeout() {
        ProxyError::Network(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        ProxyError::Network(format!("Failed to connect to upstream: {e}"))
    } else {
        ProxyError::Network(format!("Request failed: {e}"))
    }
}
