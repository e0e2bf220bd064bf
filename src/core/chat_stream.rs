//! HTTP transport for chat turns.
//!
//! [`ChatTransport::open`] resolves once the agent has answered with a status
//! and headers. The body is then pumped by a background task into a
//! [`ChunkStream`], whatever wire format the agent chose:
//!
//! - `application/json`: one buffered envelope, replayed as a single chunk
//!   plus metadata.
//! - `text/event-stream`: `data:` lines carrying JSON token/metadata/done/error
//!   events.
//! - any other type: raw text consumed as it arrives, with suggested actions
//!   taken from the `X-Next-Actions` header.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use memchr::memchr;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::api::envelope::{decode_chat_response, decode_error, is_success_status};
use crate::api::{ChatRequest, ChatStreamEvent, SessionState};
use crate::core::error::ChatError;
use crate::utils::url::construct_api_url;

pub const CHAT_ENDPOINT: &str = "api/v1/chat";
pub const NEXT_ACTIONS_HEADER: &str = "x-next-actions";
pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const SESSION_STATE_HEADER: &str = "x-session-state";
const ACCEPT_CHAT: &str = "text/event-stream, application/json;q=0.9, text/plain;q=0.8";

/// Out-of-band details of a turn: where the agent's session stands and what
/// the user might do next.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TurnMetadata {
    pub session_id: Option<String>,
    pub session_state: Option<SessionState>,
    /// `None` when the agent did not send suggestions at all.
    pub next_actions: Option<Vec<String>>,
}

impl TurnMetadata {
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.session_state.is_none() && self.next_actions.is_none()
    }

    /// Fold a later metadata delivery into this one; later values win.
    pub fn merge(&mut self, other: TurnMetadata) {
        if other.session_id.is_some() {
            self.session_id = other.session_id;
        }
        if other.session_state.is_some() {
            self.session_state = other.session_state;
        }
        if other.next_actions.is_some() {
            self.next_actions = other.next_actions;
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamMessage {
    Chunk(String),
    Metadata(TurnMetadata),
    Error(ChatError),
    End,
}

/// Single-pass feed of one response body.
///
/// Yields chunks and metadata in arrival order, then exactly one `End` or
/// `Error`, then `None` forever. Dropping it cancels the pump task and
/// releases the connection.
pub struct ChunkStream {
    rx: mpsc::UnboundedReceiver<StreamMessage>,
    cancel_token: CancellationToken,
    finished: bool,
    _release: Option<DropGuard>,
}

impl ChunkStream {
    fn new(
        rx: mpsc::UnboundedReceiver<StreamMessage>,
        cancel_token: CancellationToken,
        release: Option<DropGuard>,
    ) -> Self {
        Self {
            rx,
            cancel_token,
            finished: false,
            _release: release,
        }
    }

    /// A stream over messages that are already known, e.g. a buffered body.
    pub fn from_messages(messages: Vec<StreamMessage>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for message in messages {
            let _ = tx.send(message);
        }
        Self::new(rx, CancellationToken::new(), None)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub async fn next(&mut self) -> Option<StreamMessage> {
        if self.finished {
            return None;
        }

        let received = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => None,
            message = self.rx.recv() => message,
        };

        let message = match received {
            Some(message) => message,
            None if self.cancel_token.is_cancelled() => StreamMessage::Error(ChatError::cancelled()),
            None => StreamMessage::Error(ChatError::transport(
                "response stream closed before completion",
            )),
        };

        if matches!(message, StreamMessage::End | StreamMessage::Error(_)) {
            self.finished = true;
        }
        Some(message)
    }
}

/// Something that can carry a chat turn to the agent.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send `request` and wait for the response to start.
    ///
    /// Error statuses are turned into [`ChatError`]s here, after the error
    /// body has been decoded; a returned stream always belongs to a
    /// successful response.
    async fn open(
        &self,
        request: ChatRequest,
        cancel_token: CancellationToken,
    ) -> Result<ChunkStream, ChatError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseFormat {
    Envelope,
    EventStream,
    Text,
}

impl ResponseFormat {
    fn from_headers(headers: &HeaderMap) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let media_type = content_type
            .split(';')
            .next()
            .map(str::trim)
            .unwrap_or_default()
            .to_ascii_lowercase();
        match media_type.as_str() {
            "application/json" => ResponseFormat::Envelope,
            "text/event-stream" => ResponseFormat::EventStream,
            _ => ResponseFormat::Text,
        }
    }
}

#[derive(Clone)]
pub struct HttpChatTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpChatTransport {
    /// `timeout` bounds both the wait for response headers and every wait
    /// for the next piece of the body.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open(
        &self,
        request: ChatRequest,
        cancel_token: CancellationToken,
    ) -> Result<ChunkStream, ChatError> {
        let chat_url = construct_api_url(&self.base_url, CHAT_ENDPOINT);
        debug!(url = %chat_url, session_id = %request.session_id, "Opening chat request");

        let pending = self
            .client
            .post(chat_url)
            .header("Content-Type", "application/json")
            .header("Accept", ACCEPT_CHAT)
            .json(&request)
            .send();

        let response = tokio::select! {
            _ = cancel_token.cancelled() => return Err(ChatError::cancelled()),
            result = tokio::time::timeout(self.timeout, pending) => match result {
                Err(_) => return Err(ChatError::timed_out(self.timeout)),
                Ok(response) => response?,
            },
        };

        let status = response.status().as_u16();
        if !is_success_status(status) {
            let body = tokio::select! {
                _ = cancel_token.cancelled() => return Err(ChatError::cancelled()),
                body = tokio::time::timeout(self.timeout, response.text()) => match body {
                    Ok(Ok(text)) => text,
                    _ => String::new(),
                },
            };
            let err = decode_error(status, &body);
            debug!(status, error = %err, "Chat request rejected");
            return Err(err);
        }

        let format = ResponseFormat::from_headers(response.headers());
        let header_metadata = metadata_from_headers(response.headers());
        debug!(?format, status, "Chat response stream started");

        let (tx, rx) = mpsc::unbounded_channel();
        let pump_token = cancel_token.clone();
        let idle_timeout = self.timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = pump_body(format, response, header_metadata, &tx, idle_timeout) => {}
                _ = pump_token.cancelled() => {
                    debug!("Chat response stream cancelled");
                }
            }
        });

        let release = cancel_token.clone().drop_guard();
        Ok(ChunkStream::new(rx, cancel_token, Some(release)))
    }
}

async fn pump_body(
    format: ResponseFormat,
    response: reqwest::Response,
    header_metadata: TurnMetadata,
    tx: &mpsc::UnboundedSender<StreamMessage>,
    idle_timeout: Duration,
) {
    if !header_metadata.is_empty() {
        let _ = tx.send(StreamMessage::Metadata(header_metadata));
    }
    match format {
        ResponseFormat::Envelope => pump_envelope(response, tx, idle_timeout).await,
        ResponseFormat::EventStream => pump_event_stream(response, tx, idle_timeout).await,
        ResponseFormat::Text => pump_text(response, tx, idle_timeout).await,
    }
}

async fn pump_envelope(
    response: reqwest::Response,
    tx: &mpsc::UnboundedSender<StreamMessage>,
    idle_timeout: Duration,
) {
    let status = response.status().as_u16();
    let body = match tokio::time::timeout(idle_timeout, response.text()).await {
        Err(_) => {
            let _ = tx.send(StreamMessage::Error(ChatError::timed_out(idle_timeout)));
            return;
        }
        Ok(Err(err)) => {
            let _ = tx.send(StreamMessage::Error(err.into()));
            return;
        }
        Ok(Ok(body)) => body,
    };

    for message in envelope_messages(status, &body) {
        let _ = tx.send(message);
    }
}

/// Messages replayed for a buffered JSON body.
fn envelope_messages(status: u16, body: &str) -> Vec<StreamMessage> {
    if body.trim().is_empty() {
        return vec![StreamMessage::End];
    }
    match decode_chat_response(status, body) {
        Ok(payload) => {
            let mut messages = Vec::with_capacity(3);
            if !payload.response.is_empty() {
                messages.push(StreamMessage::Chunk(payload.response));
            }
            messages.push(StreamMessage::Metadata(TurnMetadata {
                session_id: Some(payload.session_id),
                session_state: Some(payload.session_state),
                next_actions: Some(payload.next_actions),
            }));
            messages.push(StreamMessage::End);
            messages
        }
        Err(err) => {
            if err.is_protocol() {
                warn!(error = %err, "Undecodable chat response body");
            }
            vec![StreamMessage::Error(err)]
        }
    }
}

async fn pump_text(
    response: reqwest::Response,
    tx: &mpsc::UnboundedSender<StreamMessage>,
    idle_timeout: Duration,
) {
    let mut stream = response.bytes_stream();
    let mut decoder = Utf8ChunkDecoder::default();

    loop {
        match tokio::time::timeout(idle_timeout, stream.next()).await {
            Err(_) => {
                let _ = tx.send(StreamMessage::Error(ChatError::timed_out(idle_timeout)));
                return;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                let _ = tx.send(StreamMessage::Error(err.into()));
                return;
            }
            Ok(Some(Ok(bytes))) => {
                let text = decoder.push(&bytes);
                if !text.is_empty() {
                    let _ = tx.send(StreamMessage::Chunk(text));
                }
            }
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        let _ = tx.send(StreamMessage::Chunk(rest));
    }
    let _ = tx.send(StreamMessage::End);
}

async fn pump_event_stream(
    response: reqwest::Response,
    tx: &mpsc::UnboundedSender<StreamMessage>,
    idle_timeout: Duration,
) {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        match tokio::time::timeout(idle_timeout, stream.next()).await {
            Err(_) => {
                let _ = tx.send(StreamMessage::Error(ChatError::timed_out(idle_timeout)));
                return;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                let _ = tx.send(StreamMessage::Error(err.into()));
                return;
            }
            Ok(Some(Ok(chunk_bytes))) => {
                buffer.extend_from_slice(&chunk_bytes);

                while let Some(newline_pos) = memchr(b'\n', &buffer) {
                    let line = match std::str::from_utf8(&buffer[..newline_pos]) {
                        Ok(line) => line,
                        Err(err) => {
                            let _ = tx.send(StreamMessage::Error(invalid_event_line(err)));
                            return;
                        }
                    };
                    let should_end = process_sse_line(line.trim(), tx);
                    buffer.drain(..=newline_pos);
                    if should_end {
                        return;
                    }
                }
            }
        }
    }

    match std::str::from_utf8(&buffer) {
        Ok(line) => {
            if process_sse_line(line.trim(), tx) {
                return;
            }
        }
        Err(err) => {
            let _ = tx.send(StreamMessage::Error(invalid_event_line(err)));
            return;
        }
    }

    // Connection closed without a `done` event.
    let _ = tx.send(StreamMessage::End);
}

fn invalid_event_line(err: std::str::Utf8Error) -> ChatError {
    ChatError::Protocol(format!("invalid UTF-8 in event stream: {err}"))
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Handle one event-stream line; returns `true` once the stream is over.
fn process_sse_line(line: &str, tx: &mpsc::UnboundedSender<StreamMessage>) -> bool {
    let Some(payload) = extract_data_payload(line) else {
        return false;
    };
    if payload.is_empty() {
        return false;
    }
    if payload == "[DONE]" {
        let _ = tx.send(StreamMessage::End);
        return true;
    }

    match serde_json::from_str::<ChatStreamEvent>(payload) {
        Ok(ChatStreamEvent::Token { content }) => {
            if !content.is_empty() {
                let _ = tx.send(StreamMessage::Chunk(content));
            }
            false
        }
        Ok(ChatStreamEvent::Metadata {
            session_id,
            session_state,
            next_actions,
        }) => {
            let _ = tx.send(StreamMessage::Metadata(TurnMetadata {
                session_id,
                session_state,
                next_actions: Some(next_actions),
            }));
            false
        }
        Ok(ChatStreamEvent::Data { .. }) => {
            debug!("Ignoring analysis data event");
            false
        }
        Ok(ChatStreamEvent::Done) => {
            let _ = tx.send(StreamMessage::End);
            true
        }
        Ok(ChatStreamEvent::Error { code, message }) => {
            let _ = tx.send(StreamMessage::Error(ChatError::Application {
                code: code.unwrap_or(500),
                message,
                errors: None,
            }));
            true
        }
        Err(err) => {
            warn!(payload, "Undecodable chat stream event: {err}");
            let _ = tx.send(StreamMessage::Error(ChatError::Protocol(format!(
                "invalid stream event: {err}"
            ))));
            true
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn metadata_from_headers(headers: &HeaderMap) -> TurnMetadata {
    let next_actions = header_str(headers, NEXT_ACTIONS_HEADER).and_then(|raw| {
        match serde_json::from_str::<Vec<String>>(raw) {
            Ok(actions) => Some(actions),
            Err(err) => {
                warn!(header = raw, "Ignoring malformed next-actions header: {err}");
                None
            }
        }
    });

    TurnMetadata {
        session_id: header_str(headers, SESSION_ID_HEADER).map(str::to_owned),
        session_state: header_str(headers, SESSION_STATE_HEADER)
            .map(|state| SessionState::from(state.to_string())),
        next_actions,
    }
}

/// Turns arbitrary byte pieces into text without splitting characters.
///
/// Incomplete UTF-8 sequences at the end of a piece are held back until the
/// next piece arrives; invalid bytes become U+FFFD.
#[derive(Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is held back at end of body.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
