use std::future::Future;
use std::time::Duration;

use super::envelope::{decode_envelope, decode_error, is_success_status};
use super::{
    HealthResponse, SessionInfoResponse, SessionListResponse, SessionResetRequest,
    SessionStateResponse,
};
use crate::core::error::ChatError;
use crate::utils::url::construct_api_url;

pub const HEALTH_ENDPOINT: &str = "api/v1/health";
pub const SESSIONS_ENDPOINT: &str = "api/v1/sessions";

/// `/api/v1/sessions/{session_id}[/{suffix}]`, with the id escaped as one
/// path segment.
fn session_url(
    base_url: &str,
    session_id: &str,
    suffix: Option<&str>,
) -> Result<reqwest::Url, ChatError> {
    let mut url = reqwest::Url::parse(&construct_api_url(base_url, SESSIONS_ENDPOINT))
        .map_err(|err| ChatError::transport(format!("invalid agent URL {base_url}: {err}")))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| ChatError::transport(format!("invalid agent URL {base_url}")))?;
        segments.push(session_id);
        if let Some(suffix) = suffix {
            segments.push(suffix);
        }
    }
    Ok(url)
}

async fn read_enveloped<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ChatError> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    decode_envelope(status, &body)
}

async fn read_acknowledgement(response: reqwest::Response) -> Result<(), ChatError> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    if is_success_status(status) {
        Ok(())
    } else {
        Err(decode_error(status, &body))
    }
}

pub async fn fetch_health(
    client: &reqwest::Client,
    base_url: &str,
) -> Result<HealthResponse, ChatError> {
    let response = client
        .get(construct_api_url(base_url, HEALTH_ENDPOINT))
        .send()
        .await?;
    read_enveloped(response).await
}

pub async fn fetch_session_state(
    client: &reqwest::Client,
    base_url: &str,
    session_id: &str,
) -> Result<SessionStateResponse, ChatError> {
    let response = client
        .get(session_url(base_url, session_id, Some("state"))?)
        .send()
        .await?;
    read_enveloped(response).await
}

/// Foods, open clarifications and analysis the agent holds for `session_id`.
pub async fn fetch_session_info(
    client: &reqwest::Client,
    base_url: &str,
    session_id: &str,
) -> Result<SessionInfoResponse, ChatError> {
    let response = client
        .get(session_url(base_url, session_id, None)?)
        .send()
        .await?;
    read_enveloped(response).await
}

pub async fn list_sessions(
    client: &reqwest::Client,
    base_url: &str,
) -> Result<SessionListResponse, ChatError> {
    let response = client
        .get(construct_api_url(base_url, SESSIONS_ENDPOINT))
        .send()
        .await?;
    read_enveloped(response).await
}

/// Ask the agent to drop its server-side state for `session_id`.
pub async fn reset_session(
    client: &reqwest::Client,
    base_url: &str,
    session_id: &str,
) -> Result<(), ChatError> {
    let response = client
        .post(session_url(base_url, session_id, Some("reset"))?)
        .header("Content-Type", "application/json")
        .json(&SessionResetRequest { confirm: true })
        .send()
        .await?;
    read_acknowledgement(response).await
}

pub async fn delete_session(
    client: &reqwest::Client,
    base_url: &str,
    session_id: &str,
) -> Result<(), ChatError> {
    let response = client
        .delete(session_url(base_url, session_id, None)?)
        .send()
        .await?;
    read_acknowledgement(response).await
}

/// Session-level endpoints of one agent, sharing a client.
///
/// Every call is bounded by the same deadline as a chat turn.
#[derive(Clone)]
pub struct SessionEndpoints {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl SessionEndpoints {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ChatError>>,
    ) -> Result<T, ChatError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| Err(ChatError::timed_out(self.timeout)))
    }

    pub async fn health(&self) -> Result<HealthResponse, ChatError> {
        self.bounded(fetch_health(&self.client, &self.base_url)).await
    }

    pub async fn state(&self, session_id: &str) -> Result<SessionStateResponse, ChatError> {
        self.bounded(fetch_session_state(&self.client, &self.base_url, session_id))
            .await
    }

    pub async fn info(&self, session_id: &str) -> Result<SessionInfoResponse, ChatError> {
        self.bounded(fetch_session_info(&self.client, &self.base_url, session_id))
            .await
    }

    pub async fn list(&self) -> Result<SessionListResponse, ChatError> {
        self.bounded(list_sessions(&self.client, &self.base_url)).await
    }

    pub async fn reset(&self, session_id: &str) -> Result<(), ChatError> {
        self.bounded(reset_session(&self.client, &self.base_url, session_id))
            .await
    }

    pub async fn delete(&self, session_id: &str) -> Result<(), ChatError> {
        self.bounded(delete_session(&self.client, &self.base_url, session_id))
            .await
    }
}
