//! HTTP proxy server for chat completions
//!
//! Each `POST /v1/chat/completions` is forwarded to the configured upstream
//! with its body untouched, while a companion call runs alongside it. The
//! upstream reply is streamed back with the companion frame spliced in, or
//! read whole and merged.

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
    routing::{get, post},
};
use serde_json::Value;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::companion::{
    CompanionHandle, CompanionModel, CompanionRequest, DEFAULT_COMPANION_MODEL, RemoteCompanion,
};
use crate::config::{CompanionConfig, Config, ProxyConfig};
use crate::error::{DuetError, Result};

use super::error::{ProxyError, network_error};
use super::inject::{StreamInjector, inject_companion};
use super::merge::whole_body_response;
use super::messages::{CompletionRequest, extract_last_user_message};
use super::sse::SseFrameStream;

/// Path of the proxied endpoint, on both sides
pub const COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Caller headers relayed to the upstream when present
const FORWARDED_HEADERS: &[&str] = &["accept", "user-agent", "connection", "authorization"];

/// Shared application state for all handlers
pub struct AppState {
    /// Proxy configuration
    pub config: ProxyConfig,
    /// Companion configuration
    pub companion_config: CompanionConfig,
    /// HTTP client for upstream requests
    pub client: reqwest::Client,
    /// Companion backend
    pub companion: Arc<dyn CompanionModel>,
    /// Bounded wait on the companion result
    pub companion_wait: Duration,
    /// Longest silence tolerated between streamed frames
    pub idle_timeout: Duration,
}

impl AppState {
    pub fn new(config: &Config, companion: Arc<dyn CompanionModel>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(config.proxy.connect_timeout())
            .build()
            .map_err(|e| DuetError::Proxy(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            config: config.proxy.clone(),
            companion_config: config.companion.clone(),
            client,
            companion,
            companion_wait: config.companion.wait(),
            idle_timeout: config.proxy.idle_timeout(),
        })
    }
}

/// The main proxy server
pub struct ProxyServer {
    config: Config,
}

impl ProxyServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Start the proxy server and listen for requests
    pub async fn serve(&self) -> Result<()> {
        let companion = RemoteCompanion::new(&self.config.proxy, &self.config.companion)?;
        let app_state = Arc::new(AppState::new(&self.config, Arc::new(companion))?);
        let app = create_router(app_state);

        let addr: SocketAddr = self
            .config
            .proxy
            .listen_addr
            .parse()
            .map_err(|e| DuetError::Config(format!("Invalid listen address: {e}")))?;

        info!("Starting proxy server on {addr}");
        info!("Forwarding to {}", self.config.proxy.completions_url());
        if self.config.companion.enabled {
            info!(
                "Companion enabled (model: {}, wait: {:?})",
                self.config
                    .companion
                    .model
                    .as_deref()
                    .unwrap_or("same as request"),
                self.config.companion.wait()
            );
        } else {
            info!("Companion disabled, responses are passed through");
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DuetError::Proxy(format!("Failed to bind to {addr}: {e}")))?;

        let listener = axum::serve::ListenerExt::tap_io(listener, |tcp| {
            if let Err(e) = tcp.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY on client socket: {e}");
            }
        });

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DuetError::Proxy(format!("Server error: {e}")))?;

        info!("Proxy server shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(COMPLETIONS_PATH, post(chat_completions_handler))
        .fallback(not_found_handler)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint - returns JSON status
async fn health_handler() -> Json<Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn not_found_handler(request: Request<Body>) -> Response<Body> {
    ProxyError::NotFound(request.uri().path().to_string()).into_response()
}

/// Turn a handler panic into a 500 so the caller still gets one response
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");

    tracing::error!(error_type = "internal", error_message = message, "Handler panicked");
    ProxyError::Internal("Internal server error".to_string()).into_response()
}

async fn chat_completions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Response<Body> {
    let request_id = Uuid::new_v4();
    let span = info_span!("chat_completion", %request_id);

    async move {
        match proxy_completion(&state, &headers, body).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    error_type = e.category(),
                    error_message = %e,
                    "Request ended with error response"
                );
                e.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

/// How the upstream reply is relayed to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// Frame by frame, with the companion frame spliced in
    Streaming,
    /// Read whole, merged, then written at once
    WholeBody,
}

impl ReplyMode {
    pub fn classify(requested_stream: bool, status: StatusCode, content_type: Option<&str>) -> Self {
        let is_json = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));

        if requested_stream && status == StatusCode::OK && !is_json {
            ReplyMode::Streaming
        } else {
            ReplyMode::WholeBody
        }
    }
}

async fn proxy_completion(
    state: &AppState,
    headers: &HeaderMap,
    body: Body,
) -> std::result::Result<Response<Body>, ProxyError> {
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ProxyError::BadRequest(format!("Failed to read request body: {e}")))?;

    let request = parse_request(&body_bytes)?;

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    info!(
        stream = request.stream,
        model = request.model.as_deref().unwrap_or("-"),
        messages = request.messages.len(),
        authorization = %authorization.as_deref().map(mask_credential).unwrap_or_default(),
        "Received chat completion request"
    );

    let companion = dispatch_companion(state, &request, authorization);

    let upstream_url = state.config.completions_url();
    debug!("Forwarding request to {upstream_url}");

    let send = state
        .client
        .post(&upstream_url)
        .headers(upstream_headers(headers))
        .body(body_bytes)
        .send();

    let response = tokio::time::timeout(state.config.timeout(), send)
        .await
        .map_err(|_| {
            ProxyError::Network(format!(
                "Upstream did not respond within {:?}",
                state.config.timeout()
            ))
        })?
        .map_err(network_error)?;

    let status = StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mode = ReplyMode::classify(request.stream, status, content_type.as_deref());
    debug!(
        status = status.as_u16(),
        content_type = content_type.as_deref().unwrap_or("-"),
        ?mode,
        "Upstream responded"
    );

    match mode {
        ReplyMode::Streaming => stream_response(state, response, companion),
        ReplyMode::WholeBody => {
            let body = tokio::time::timeout(state.config.timeout(), response.bytes())
                .await
                .map_err(|_| {
                    ProxyError::Network(format!(
                        "Upstream body not received within {:?}",
                        state.config.timeout()
                    ))
                })?
                .map_err(network_error)?;

            whole_body_response(
                status,
                body,
                companion,
                state.companion_wait,
                &state.companion_config.separator,
            )
            .await
        }
    }
}

fn stream_response(
    state: &AppState,
    response: reqwest::Response,
    companion: CompanionHandle,
) -> std::result::Result<Response<Body>, ProxyError> {
    let frames = SseFrameStream::new(Box::pin(response.bytes_stream()));
    let injector = StreamInjector::new(
        companion,
        state.companion_wait,
        state.companion_config.separator.clone(),
    );
    let stream = inject_companion(frames, injector, state.idle_timeout);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
        .map_err(|e| ProxyError::Internal(format!("Failed to build streaming response: {e}")))
}

/// Validate the inbound body and read the fields the proxy needs
pub fn parse_request(body: &[u8]) -> std::result::Result<CompletionRequest, ProxyError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ProxyError::BadRequest("Request body is empty".to_string()));
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ProxyError::BadRequest(format!("Invalid JSON: {e}")))?;

    if !value.is_object() {
        return Err(ProxyError::BadRequest(
            "Request body must be a JSON object".to_string(),
        ));
    }

    Ok(CompletionRequest::from_json(&value))
}

fn dispatch_companion(
    state: &AppState,
    request: &CompletionRequest,
    authorization: Option<String>,
) -> CompanionHandle {
    if !state.companion_config.enabled {
        return CompanionHandle::skipped();
    }

    let user_text = extract_last_user_message(&request.messages);
    if user_text.trim().is_empty() {
        debug!("No user text in request, skipping companion");
        return CompanionHandle::skipped();
    }

    let model = state
        .companion_config
        .model
        .clone()
        .or_else(|| request.model.clone().filter(|model| !model.is_empty()))
        .unwrap_or_else(|| DEFAULT_COMPANION_MODEL.to_string());

    CompanionHandle::dispatch(
        state.companion.clone(),
        CompanionRequest {
            user_text,
            authorization,
            model,
        },
    )
}

/// Headers sent upstream: the relayed caller headers plus forced encoding
/// and content type
fn upstream_headers(headers: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut forwarded = reqwest::header::HeaderMap::new();
    for name in FORWARDED_HEADERS {
        if let Some(value) = headers.get(*name) {
            forwarded.insert(header::HeaderName::from_static(name), value.clone());
        }
    }
    forwarded.insert(
        header::ACCEPT_ENCODING,
        HeaderValue::from_static("identity"),
    );
    forwarded.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    forwarded
}

/// Mask a credential for logging
pub fn mask_credential(value: &str) -> String {
    if value.chars().count() > 20 {
        let prefix: String = value.chars().take(20).collect();
        format!("{prefix}...")
    } else {
        "***masked***".to_string()
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
