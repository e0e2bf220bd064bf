//! Decoding of the agent's `{ data, meta?, pagination? }` response envelope.
//!
//! Three outcomes are kept apart: a payload, an application error reported by
//! the agent in `meta`, and a protocol error when the body has the wrong shape.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::{ChatPayload, ErrorMeta};
use crate::core::error::ChatError;

/// Longest raw body excerpt quoted in transport errors.
const BODY_EXCERPT_LIMIT: usize = 200;

pub fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Decode a chat response body received with `status`.
pub fn decode_chat_response(status: u16, body: &str) -> Result<ChatPayload, ChatError> {
    decode_envelope(status, body)
}

/// Decode any enveloped payload received with `status`.
///
/// `meta` wins over `data`: some backends fill both on failure, and the error
/// must not be hidden behind a partial payload.
pub fn decode_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, ChatError> {
    if !is_success_status(status) {
        return Err(decode_error(status, body));
    }

    let value: Value = serde_json::from_str(body.trim())
        .map_err(|err| ChatError::Protocol(format!("response is not valid JSON: {err}")))?;

    match parse_meta(&value) {
        Some(Ok(meta)) => return Err(meta.into()),
        Some(Err(err)) => {
            return Err(ChatError::Protocol(format!("invalid error envelope: {err}")));
        }
        None => {}
    }

    let Some(object) = value.as_object() else {
        return Err(ChatError::Protocol(
            "response body is not a JSON object".to_string(),
        ));
    };

    match object.get("data") {
        Some(data) if !data.is_null() => match T::deserialize(data) {
            Ok(payload) => Ok(payload),
            // Unwrapped payloads may carry their own `data` detail field.
            Err(enveloped_err) => T::deserialize(&value).map_err(|_| {
                ChatError::Protocol(format!("invalid response payload: {enveloped_err}"))
            }),
        },
        _ => T::deserialize(&value)
            .map_err(|err| ChatError::Protocol(format!("invalid response payload: {err}"))),
    }
}

/// Build the error for a failing (`non-2xx`) response.
///
/// Understands `meta` envelopes plus the agent's validation (`detail`) and
/// middleware (`success: false, error`) shapes. Bodies that carry no readable
/// message become transport errors tagged with the status.
pub fn decode_error(status: u16, body: &str) -> ChatError {
    let trimmed = body.trim();
    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return ChatError::Transport {
            message: excerpt_or_placeholder(trimmed),
            status: Some(status),
        };
    };

    if let Some(Ok(meta)) = parse_meta(&value) {
        return meta.into();
    }

    match extract_error_summary(&value) {
        Some(message) if !message.is_empty() => ChatError::Application {
            code: i64::from(status),
            message,
            errors: value.get("details").cloned().filter(|v| !v.is_null()),
        },
        _ => ChatError::Transport {
            message: excerpt_or_placeholder(trimmed),
            status: Some(status),
        },
    }
}

fn parse_meta(value: &Value) -> Option<Result<ErrorMeta, serde_json::Error>> {
    let meta = value.get("meta").filter(|meta| !meta.is_null())?;
    Some(ErrorMeta::deserialize(meta))
}

impl From<ErrorMeta> for ChatError {
    fn from(meta: ErrorMeta) -> Self {
        ChatError::Application {
            code: meta.code,
            message: meta.message,
            errors: meta.errors,
        }
    }
}

fn extract_error_summary(value: &Value) -> Option<String> {
    let summary = value
        .pointer("/meta/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("detail").and_then(|v| match v {
                Value::String(s) => Some(s.to_string()),
                // Request validation failures list one entry per field.
                Value::Array(items) => {
                    let messages: Vec<&str> = items
                        .iter()
                        .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                        .collect();
                    (!messages.is_empty()).then(|| messages.join("; "))
                }
                _ => None,
            })
        })
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                Value::String(s) => Some(s.to_string()),
                Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

fn excerpt_or_placeholder(body: &str) -> String {
    if body.is_empty() {
        return "<empty body>".to_string();
    }
    let mut excerpt: String = body.chars().take(BODY_EXCERPT_LIMIT).collect();
    if body.chars().count() > BODY_EXCERPT_LIMIT {
        excerpt.push('…');
    }
    excerpt
}
