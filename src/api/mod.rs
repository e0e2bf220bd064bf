use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod envelope;
pub mod sessions;

/// Body of `POST /api/v1/chat`.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
}

/// Workflow state reported by the agent.
///
/// Informational only. Unknown strings decode to [`SessionState::Initial`],
/// matching how the agent itself treats unrecognized states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SessionState {
    #[default]
    Initial,
    Tracking,
    Clarifying,
    Advising,
    Advised,
    Completed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Initial => "initial",
            SessionState::Tracking => "tracking",
            SessionState::Clarifying => "clarifying",
            SessionState::Advising => "advising",
            SessionState::Advised => "advised",
            SessionState::Completed => "completed",
        }
    }
}

impl From<String> for SessionState {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "tracking" => SessionState::Tracking,
            "clarifying" => SessionState::Clarifying,
            "advising" => SessionState::Advising,
            "advised" => SessionState::Advised,
            "completed" => SessionState::Completed,
            _ => SessionState::Initial,
        }
    }
}

impl From<SessionState> for String {
    fn from(value: SessionState) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful chat payload, found under `data` in the response envelope.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ChatPayload {
    pub session_id: String,
    pub response: String,
    #[serde(default)]
    pub session_state: SessionState,
    #[serde(default)]
    pub next_actions: Vec<String>,
    /// Extracted foods and analysis details; not interpreted by the client.
    #[serde(default, rename = "data")]
    pub details: Option<Value>,
}

/// Error detail carried in `meta` by failing responses.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ErrorMeta {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
}

/// Events carried by `text/event-stream` chat responses.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    Token {
        content: String,
    },
    Metadata {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        session_state: Option<SessionState>,
        #[serde(default)]
        next_actions: Vec<String>,
    },
    Data {
        #[serde(default)]
        data: Value,
    },
    Done,
    Error {
        #[serde(default)]
        code: Option<i64>,
        message: String,
    },
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub message: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SessionStateResponse {
    pub session_id: String,
    pub current_state: SessionState,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Everything the agent tracks for one session.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SessionInfoResponse {
    pub session_id: String,
    pub current_state: SessionState,
    #[serde(default)]
    pub extracted_foods: Vec<Value>,
    #[serde(default)]
    pub pending_clarifications: Vec<Value>,
    #[serde(default)]
    pub has_analysis: bool,
    #[serde(default)]
    pub advisor_recommendations: Option<Value>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SessionListItem {
    pub session_id: String,
    pub current_state: SessionState,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SessionListResponse {
    #[serde(default)]
    pub sessions: Vec<SessionListItem>,
    #[serde(default)]
    pub total: usize,
}

#[derive(Serialize, Debug, Clone)]
pub struct SessionResetRequest {
    pub confirm: bool,
}
