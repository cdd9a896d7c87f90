//! Inbound request view and user-prompt extraction
//!
//! The inbound body is forwarded upstream byte-for-byte; this module only
//! reads the few fields the proxy cares about. Message content comes in
//! several shapes, which are decoded once into [`MessageContent`].

use serde_json::Value;

/// The fields of an inbound chat completion the proxy inspects
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    /// Requested model, if any
    pub model: Option<String>,
    /// Whether the caller asked for an event stream
    pub stream: bool,
    /// Conversation history, oldest first
    pub messages: Vec<Message>,
}

impl CompletionRequest {
    /// Read the request leniently; missing or mistyped fields fall back to defaults
    pub fn from_json(body: &Value) -> Self {
        let messages = body
            .get("messages")
            .and_then(Value::as_array)
            .map(|messages| messages.iter().map(Message::from_json).collect())
            .unwrap_or_default();

        Self {
            model: body
                .get("model")
                .and_then(Value::as_str)
                .map(str::to_string),
            stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
            messages,
        }
    }
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: Option<MessageContent>,
}

impl Message {
    pub fn from_json(value: &Value) -> Self {
        Self {
            role: value
                .get("role")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            content: value.get("content").map(MessageContent::from_json),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == "user"
    }
}

/// The shapes a message's `content` may take
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    /// Plain string content
    Text(String),
    /// Ordered parts: an OpenAI content array, or an object with a `parts` list
    Parts(Vec<Value>),
    /// An object wrapping a single `content` string
    Nested(String),
    /// Anything else
    Other(Value),
}

impl MessageContent {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(text) => MessageContent::Text(text.clone()),
            Value::Array(parts) if !parts.is_empty() => MessageContent::Parts(parts.clone()),
            Value::Object(map) => {
                if let Some(Value::Array(parts)) = map.get("parts") {
                    if !parts.is_empty() {
                        return MessageContent::Parts(parts.clone());
                    }
                }
                if let Some(Value::String(inner)) = map.get("content") {
                    return MessageContent::Nested(inner.clone());
                }
                MessageContent::Other(value.clone())
            }
            other => MessageContent::Other(other.clone()),
        }
    }

    /// Resolve the content to plain text
    ///
    /// Parts resolve to the last part only.
    pub fn to_text(&self) -> String {
        match self {
            MessageContent::Text(text) | MessageContent::Nested(text) => text.clone(),
            MessageContent::Parts(parts) => parts.last().map(part_text).unwrap_or_default(),
            MessageContent::Other(Value::Null) => String::new(),
            MessageContent::Other(value) => value.to_string(),
        }
    }
}

fn part_text(part: &Value) -> String {
    match part {
        Value::String(text) => text.clone(),
        Value::Object(map) => map
            .get("text")
            .or_else(|| map.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| part.to_string()),
        other => other.to_string(),
    }
}

/// Text of the most recent user message, or an empty string if there is none
pub fn extract_last_user_message(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find_map(|message| match (&message.content, message.is_user()) {
            (Some(content), true) => Some(content.to_text()),
            _ => None,
        })
        .unwrap_or_default()
}
