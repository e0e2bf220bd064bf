use std::error::Error as StdError;
use std::fmt;

use serde_json::Value;

/// Message shown when the agent answers with something we cannot decode.
pub const UNEXPECTED_RESPONSE_MESSAGE: &str = "Unexpected response from the nutrition agent.";

/// Failures that can end a chat turn.
///
/// Every variant resolves the session back to idle and lands in the single
/// error slot of the snapshot; nothing is retried automatically.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatError {
    /// The request never produced a usable response (connection refused,
    /// timeout, mid-stream I/O failure, or an error status without a
    /// decodable body).
    Transport {
        message: String,
        /// HTTP status when the failure came from a response.
        status: Option<u16>,
    },

    /// The agent returned an error envelope.
    Application {
        code: i64,
        message: String,
        errors: Option<Value>,
    },

    /// The response body did not have the expected shape.
    Protocol(String),

    /// The user abandoned the turn.
    Cancelled,

    /// Reading or writing the persisted transcript failed.
    Persistence(String),
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        ChatError::Transport {
            message: message.into(),
            status: None,
        }
    }

    pub fn cancelled() -> Self {
        ChatError::Cancelled
    }

    pub fn timed_out(after: std::time::Duration) -> Self {
        Self::transport(format!(
            "No response from the nutrition agent after {}s",
            after.as_secs()
        ))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, ChatError::Protocol(_))
    }

    /// Text for the dismissible error banner.
    ///
    /// Application errors are shown verbatim; protocol details stay in the
    /// log and the user only sees a generic message.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Transport { message, status } => match status {
                Some(code) => format!("Request failed ({code}): {message}"),
                None => format!("Request failed: {message}"),
            },
            ChatError::Application { message, .. } => message.clone(),
            ChatError::Protocol(_) => UNEXPECTED_RESPONSE_MESSAGE.to_string(),
            ChatError::Cancelled => "Reply cancelled".to_string(),
            ChatError::Persistence(message) => format!("Could not save history: {message}"),
        }
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Transport { message, status } => match status {
                Some(code) => write!(f, "transport error (HTTP {code}): {message}"),
                None => write!(f, "transport error: {message}"),
            },
            ChatError::Application { code, message, .. } => {
                write!(f, "agent error {code}: {message}")
            }
            ChatError::Protocol(detail) => write!(f, "protocol error: {detail}"),
            ChatError::Cancelled => write!(f, "request cancelled"),
            ChatError::Persistence(detail) => write!(f, "persistence error: {detail}"),
        }
    }
}

impl StdError for ChatError {}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ChatError::Transport {
                message: "request timed out".to_string(),
                status: err.status().map(|s| s.as_u16()),
            };
        }
        ChatError::Transport {
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_errors_show_agent_message_verbatim() {
        let err = ChatError::Application {
            code: 5001,
            message: "agent unavailable".into(),
            errors: None,
        };
        assert_eq!(err.user_message(), "agent unavailable");
        assert_eq!(err.to_string(), "agent error 5001: agent unavailable");
    }

    #[test]
    fn protocol_errors_hide_detail_from_user() {
        let err = ChatError::Protocol("missing field `response`".into());
        assert_eq!(err.user_message(), UNEXPECTED_RESPONSE_MESSAGE);
        assert!(err.to_string().contains("missing field"));
    }

    #[test]
    fn transport_errors_mention_status_when_known() {
        let err = ChatError::Transport {
            message: "bad gateway".into(),
            status: Some(502),
        };
        assert_eq!(err.user_message(), "Request failed (502): bad gateway");
    }

    #[test]
    fn cancellation_has_its_own_wording() {
        let err = ChatError::cancelled();
        assert_eq!(err.user_message(), "Reply cancelled");
        assert_eq!(err.to_string(), "request cancelled");
    }
}
