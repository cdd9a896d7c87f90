//! Whole-body response merging
//!
//! Upstream answers come back with either a chat-style `message` choice or
//! a legacy completion-style `text` choice. The shape is read once into a
//! [`ChoiceShape`] and the merged text is written back in the same shape.

use axum::{
    body::Body,
    http::{Response, StatusCode, header},
};
use bytes::Bytes;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, info};

use crate::companion::CompanionHandle;

use super::error::ProxyError;

/// Shape of `choices[0]` in an upstream response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceShape {
    /// `choices[0].message` is an object
    Message,
    /// `choices[0].text` is present
    Text,
    /// `choices[0]` is an object with neither field
    Bare,
    /// `choices[0]` is a string, number or other non-object
    Scalar,
    /// No usable `choices` array
    Missing,
}

impl ChoiceShape {
    pub fn of(data: &Value) -> Self {
        let Some(first) = first_choice(data) else {
            return ChoiceShape::Missing;
        };

        if !first.is_object() {
            ChoiceShape::Scalar
        } else if first.get("message").is_some_and(Value::is_object) {
            ChoiceShape::Message
        } else if first.get("text").is_some() {
            ChoiceShape::Text
        } else {
            ChoiceShape::Bare
        }
    }
}

fn first_choice(data: &Value) -> Option<&Value> {
    data.get("choices")?.as_array()?.first()
}

/// Assistant text of a whole-body response
///
/// Falls back to a top-level `text` field when no choice carries text.
pub fn extract_response_text(data: &Value) -> Option<String> {
    let from_choice = match ChoiceShape::of(data) {
        ChoiceShape::Message => first_choice(data)
            .and_then(|choice| choice.get("message")?.get("content")?.as_str()),
        ChoiceShape::Text => first_choice(data).and_then(|choice| choice.get("text")?.as_str()),
        ChoiceShape::Bare | ChoiceShape::Scalar | ChoiceShape::Missing => None,
    };

    from_choice
        .or_else(|| data.get("text").and_then(Value::as_str))
        .map(str::to_string)
}

/// Join main and companion text
///
/// The separator only appears when there is companion text.
pub fn combine_text(main: &str, companion: Option<&str>, separator: &str) -> String {
    match companion {
        Some(extra) if !extra.is_empty() => format!("{main}{separator}{extra}"),
        _ => main.to_string(),
    }
}

/// Write the combined text into `choices[0]`, keeping the upstream shape
pub fn merge_companion_text(mut data: Value, companion: Option<&str>, separator: &str) -> Value {
    let main = extract_response_text(&data).unwrap_or_default();
    let combined = combine_text(&main, companion, separator);

    match ChoiceShape::of(&data) {
        ChoiceShape::Message => {
            if let Some(message) = data["choices"][0]
                .get_mut("message")
                .and_then(Value::as_object_mut)
            {
                message.insert("content".to_string(), Value::String(combined));
            }
        }
        ChoiceShape::Text => {
            data["choices"][0]["text"] = Value::String(combined);
        }
        ChoiceShape::Bare => {
            if let Some(choice) = data["choices"][0].as_object_mut() {
                choice.insert("message".to_string(), assistant_message(combined));
            }
        }
        ChoiceShape::Scalar => {
            data["choices"][0] = json!({ "message": assistant_message(combined) });
        }
        ChoiceShape::Missing => {
            let choices = json!([{ "message": assistant_message(combined) }]);
            match data.as_object_mut() {
                Some(object) => {
                    object.insert("choices".to_string(), choices);
                }
                None => {
                    let mut object = Map::new();
                    object.insert("choices".to_string(), choices);
                    data = Value::Object(object);
                }
            }
        }
    }

    data
}

fn assistant_message(content: String) -> Value {
    json!({ "role": "assistant", "content": content })
}

/// Build the caller-facing response for a whole-body upstream answer
///
/// Non-success statuses are relayed untouched and the companion result is
/// never read for them. Success bodies must be JSON; the companion is
/// awaited once and merged in.
pub async fn whole_body_response(
    status: StatusCode,
    body: Bytes,
    companion: CompanionHandle,
    wait: Duration,
    separator: &str,
) -> Result<Response<Body>, ProxyError> {
    if !status.is_success() {
        debug!(status = status.as_u16(), "Relaying upstream error body");
        return Err(ProxyError::Upstream { status, body });
    }

    let data: Value = serde_json::from_slice(&body)
        .map_err(|e| ProxyError::InvalidUpstreamResponse(format!("Body is not JSON: {e}")))?;

    let companion_text = companion.wait(wait).await.into_text();
    let injected = companion_text.is_some();
    let merged = merge_companion_text(data, companion_text.as_deref(), separator);

    let payload = serde_json::to_vec(&merged)
        .map_err(|e| ProxyError::Internal(format!("Failed to serialize merged body: {e}")))?;

    info!(
        status = status.as_u16(),
        companion_injected = injected,
        "Whole-body response merged"
    );

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, payload.len())
        .body(Body::from(payload))
        .map_err(|e| ProxyError::Internal(format!("Failed to build response: {e}")))
}
