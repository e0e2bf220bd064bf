//! Send/receive state machine behind the chat UI.
//!
//! [`SessionController`] owns the transcript. A turn moves the machine
//! `Idle → Sending → Streaming → Idle`; any failure drops straight back to
//! `Idle` with the error slot filled. Only one turn can be in flight: a
//! second send is rejected rather than interleaved with the first.
//!
//! Turns can be driven in one call with [`SessionController::send`], or step
//! by step (`begin_turn`, `stream_opened`, `append_chunk`, `apply_metadata`,
//! `finish_turn`, `fail_turn`) by a caller that owns its own event loop.
//! Every step names its turn id; steps for a turn that is no longer current
//! are ignored.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ChatRequest, SessionState};
use crate::core::chat_stream::{ChatTransport, StreamMessage, TurnMetadata};
use crate::core::error::ChatError;
use crate::core::message::Message;
use crate::core::suggestions::SuggestionTracker;
use crate::core::transcript_store::{PersistedTranscript, TranscriptStore};
use crate::utils::ids::new_session_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    /// The stored transcript has not been consulted yet.
    Uninitialized,
    Idle,
    /// Request issued, no response yet.
    Sending,
    /// Response body is arriving.
    Streaming,
}

impl ChatState {
    pub fn is_busy(self) -> bool {
        matches!(self, ChatState::Sending | ChatState::Streaming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The text was empty after trimming.
    Empty,
    /// Another turn is still in flight.
    Busy,
    /// `initialize` has not run yet.
    NotReady,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Completed,
    Failed(ChatError),
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub session_id: String,
    pub state: SessionState,
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSnapshot {
    pub transcript: Vec<Message>,
    pub state: ChatState,
    pub is_loading: bool,
    pub error: Option<String>,
    pub suggested_actions: Vec<String>,
    pub session: SessionInfo,
    /// Increases with every transcript mutation.
    pub revision: u64,
}

/// Everything needed to carry out a turn that `begin_turn` accepted.
#[derive(Debug, Clone)]
pub struct TurnTicket {
    pub turn_id: u64,
    pub request: ChatRequest,
    pub cancel_token: CancellationToken,
}

struct PendingExchange {
    turn_id: u64,
    placeholder_id: String,
    received_content: bool,
    cancel_token: CancellationToken,
    metadata: TurnMetadata,
}

pub struct SessionController {
    transport: Arc<dyn ChatTransport>,
    store: Box<dyn TranscriptStore>,
    transcript: Vec<Message>,
    state: ChatState,
    error: Option<ChatError>,
    suggestions: SuggestionTracker,
    session_id: String,
    session_state: SessionState,
    pending: Option<PendingExchange>,
    last_turn_id: u64,
    revision: u64,
    updates: watch::Sender<ChatSnapshot>,
}

impl SessionController {
    pub fn new(transport: Arc<dyn ChatTransport>, store: Box<dyn TranscriptStore>) -> Self {
        let session_id = new_session_id();
        let initial = ChatSnapshot {
            transcript: Vec::new(),
            state: ChatState::Uninitialized,
            is_loading: false,
            error: None,
            suggested_actions: Vec::new(),
            session: SessionInfo {
                session_id: session_id.clone(),
                state: SessionState::Initial,
            },
            revision: 0,
        };
        let (updates, _) = watch::channel(initial);

        Self {
            transport,
            store,
            transcript: Vec::new(),
            state: ChatState::Uninitialized,
            error: None,
            suggestions: SuggestionTracker::new(),
            session_id,
            session_state: SessionState::Initial,
            pending: None,
            last_turn_id: 0,
            revision: 0,
            updates,
        }
    }

    /// Restore the stored transcript and open the machine for sends.
    ///
    /// A reply that was still pending when the record was written is dropped
    /// if nothing of it had arrived. Empty replies of settled turns stay.
    pub fn initialize(&mut self) {
        if self.state != ChatState::Uninitialized {
            return;
        }

        let stored = self.store.load();
        let restored = stored.messages.len();
        let abandoned = stored.pending_reply;
        self.transcript = stored
            .messages
            .into_iter()
            .filter(|message| {
                !(abandoned.as_deref() == Some(message.id.as_str())
                    && message.is_assistant()
                    && message.content.is_empty())
            })
            .collect();
        if let Some(session_id) = stored.session_id.filter(|id| !id.trim().is_empty()) {
            self.session_id = session_id;
        }
        self.state = ChatState::Idle;
        debug!(
            messages = self.transcript.len(),
            dropped = restored - self.transcript.len(),
            session_id = %self.session_id,
            "Chat session initialized"
        );

        if self.transcript.len() != restored || abandoned.is_some() {
            self.persist();
        }
        self.publish();
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            transcript: self.transcript.clone(),
            state: self.state,
            is_loading: self.state.is_busy(),
            error: self.error.as_ref().map(ChatError::user_message),
            suggested_actions: self.suggestions.actions().to_vec(),
            session: SessionInfo {
                session_id: self.session_id.clone(),
                state: self.session_state,
            },
            revision: self.revision,
        }
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn last_error(&self) -> Option<&ChatError> {
        self.error.as_ref()
    }

    pub fn suggested_actions(&self) -> &[String] {
        self.suggestions.actions()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_state(&self) -> SessionState {
        self.session_state
    }

    pub fn is_current_turn(&self, turn_id: u64) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| pending.turn_id == turn_id)
    }

    pub fn dismiss_error(&mut self) {
        if self.error.take().is_some() {
            self.publish();
        }
    }

    /// Run a whole turn for `text` against the transport.
    pub async fn send(&mut self, text: &str) -> SendOutcome {
        match self.begin_turn(text) {
            Ok(ticket) => self.drive_turn(ticket).await,
            Err(reason) => SendOutcome::Rejected(reason),
        }
    }

    /// Drop the current suggestions, then send `token` as the next message.
    pub async fn act_on_suggestion(&mut self, token: &str) -> SendOutcome {
        match self.begin_suggested_turn(token) {
            Ok(ticket) => self.drive_turn(ticket).await,
            Err(reason) => SendOutcome::Rejected(reason),
        }
    }

    /// Step form of [`Self::act_on_suggestion`].
    pub fn begin_suggested_turn(&mut self, token: &str) -> Result<TurnTicket, RejectReason> {
        self.suggestions.clear();
        self.publish();
        self.begin_turn(token)
    }

    /// Start a turn: record the user message and an empty assistant
    /// placeholder, and hand back the request to issue.
    pub fn begin_turn(&mut self, text: &str) -> Result<TurnTicket, RejectReason> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RejectReason::Empty);
        }
        match self.state {
            ChatState::Uninitialized => return Err(RejectReason::NotReady),
            state if state.is_busy() => return Err(RejectReason::Busy),
            _ => {}
        }

        self.error = None;
        self.transcript.push(Message::user(text));
        let placeholder = Message::assistant_placeholder();
        let placeholder_id = placeholder.id.clone();
        self.transcript.push(placeholder);

        self.last_turn_id += 1;
        let turn_id = self.last_turn_id;
        let cancel_token = CancellationToken::new();
        self.pending = Some(PendingExchange {
            turn_id,
            placeholder_id,
            received_content: false,
            cancel_token: cancel_token.clone(),
            metadata: TurnMetadata::default(),
        });
        self.state = ChatState::Sending;
        debug!(turn_id, session_id = %self.session_id, "Chat turn started");

        self.persist();
        self.publish();

        Ok(TurnTicket {
            turn_id,
            request: ChatRequest {
                message: text.to_string(),
                session_id: self.session_id.clone(),
            },
            cancel_token,
        })
    }

    /// Carry an accepted turn through the transport until it settles.
    pub async fn drive_turn(&mut self, ticket: TurnTicket) -> SendOutcome {
        let TurnTicket {
            turn_id,
            request,
            cancel_token,
        } = ticket;

        let transport = Arc::clone(&self.transport);
        let mut stream = match transport.open(request, cancel_token).await {
            Ok(stream) => stream,
            Err(err) => {
                self.fail_turn(turn_id, err.clone());
                return SendOutcome::Failed(err);
            }
        };
        self.stream_opened(turn_id);

        while let Some(message) = stream.next().await {
            if !self.is_current_turn(turn_id) {
                // Settled elsewhere, e.g. by `cancel`.
                break;
            }
            match message {
                StreamMessage::Chunk(text) => self.append_chunk(turn_id, &text),
                StreamMessage::Metadata(metadata) => self.apply_metadata(turn_id, metadata),
                StreamMessage::End => {
                    self.finish_turn(turn_id);
                    return SendOutcome::Completed;
                }
                StreamMessage::Error(err) => {
                    self.fail_turn(turn_id, err.clone());
                    return SendOutcome::Failed(err);
                }
            }
        }

        match self.error.clone() {
            Some(err) if !self.is_current_turn(turn_id) => SendOutcome::Failed(err),
            _ => {
                let err = ChatError::transport("response stream ended unexpectedly");
                self.fail_turn(turn_id, err.clone());
                SendOutcome::Failed(err)
            }
        }
    }

    pub fn stream_opened(&mut self, turn_id: u64) {
        if !self.is_current_turn(turn_id) || self.state != ChatState::Sending {
            return;
        }
        self.state = ChatState::Streaming;
        self.publish();
    }

    /// Append a piece of the reply to the placeholder.
    pub fn append_chunk(&mut self, turn_id: u64, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        let Some(pending) = self.pending.as_mut().filter(|p| p.turn_id == turn_id) else {
            debug!(turn_id, "Dropping chunk for a settled turn");
            return;
        };
        let Some(placeholder) = self
            .transcript
            .iter_mut()
            .rev()
            .find(|message| message.id == pending.placeholder_id)
        else {
            return;
        };

        placeholder.content.push_str(chunk);
        pending.received_content = true;
        if self.state == ChatState::Sending {
            self.state = ChatState::Streaming;
        }

        self.persist();
        self.publish();
    }

    pub fn apply_metadata(&mut self, turn_id: u64, metadata: TurnMetadata) {
        if let Some(pending) = self.pending.as_mut().filter(|p| p.turn_id == turn_id) {
            pending.metadata.merge(metadata);
        }
    }

    /// Settle the turn successfully. The placeholder stays as the final
    /// assistant message, and the agent's suggestions replace the old ones.
    pub fn finish_turn(&mut self, turn_id: u64) {
        let Some(pending) = self.take_pending(turn_id) else {
            return;
        };
        let TurnMetadata {
            session_id,
            session_state,
            next_actions,
        } = pending.metadata;

        if let Some(session_id) = session_id.filter(|id| !id.trim().is_empty()) {
            if session_id != self.session_id {
                debug!(old = %self.session_id, new = %session_id, "Agent assigned session id");
                self.session_id = session_id;
            }
        }
        if let Some(state) = session_state {
            self.session_state = state;
        }
        self.suggestions.replace(next_actions.unwrap_or_default());
        self.state = ChatState::Idle;
        debug!(turn_id, session_state = %self.session_state, "Chat turn completed");

        self.persist();
        self.publish();
    }

    /// Settle the turn with `error`.
    ///
    /// An empty placeholder is removed; partial content that already
    /// arrived is kept. The user message always stays.
    pub fn fail_turn(&mut self, turn_id: u64, error: ChatError) {
        let Some(pending) = self.take_pending(turn_id) else {
            return;
        };

        if !pending.received_content {
            self.transcript
                .retain(|message| message.id != pending.placeholder_id);
        }
        if error.is_protocol() {
            warn!(turn_id, error = %error, "Chat turn failed on an unexpected response");
        } else {
            debug!(turn_id, error = %error, kept_partial = pending.received_content, "Chat turn failed");
        }
        self.error = Some(error);
        self.state = ChatState::Idle;

        self.persist();
        self.publish();
    }

    /// Abort the in-flight turn, releasing its connection.
    pub fn cancel(&mut self) {
        let Some(turn_id) = self.pending.as_ref().map(|pending| pending.turn_id) else {
            return;
        };
        if let Some(pending) = &self.pending {
            pending.cancel_token.cancel();
        }
        self.fail_turn(turn_id, ChatError::cancelled());
    }

    /// Empty the transcript and erase the stored copy.
    ///
    /// Starts a fresh session when there was anything to clear, so calling
    /// it again changes nothing. Returns the id of the session that was
    /// cleared.
    pub fn clear_history(&mut self) -> Result<String, RejectReason> {
        if self.state.is_busy() {
            return Err(RejectReason::Busy);
        }

        let previous = self.session_id.clone();
        if !self.transcript.is_empty() {
            self.session_id = new_session_id();
            self.session_state = SessionState::Initial;
        }
        self.transcript.clear();
        self.suggestions.clear();
        self.error = None;

        self.revision += 1;
        if let Err(err) = self.store.clear(self.revision) {
            warn!(error = %err, "Could not erase stored chat history");
        }
        self.publish();
        Ok(previous)
    }

    fn take_pending(&mut self, turn_id: u64) -> Option<PendingExchange> {
        if !self.is_current_turn(turn_id) {
            debug!(turn_id, "Ignoring settle for a stale turn");
            return None;
        }
        self.pending.take()
    }

    fn persist(&mut self) {
        self.revision += 1;
        let record = PersistedTranscript {
            session_id: Some(self.session_id.clone()),
            messages: self.transcript.clone(),
            pending_reply: self
                .pending
                .as_ref()
                .map(|pending| pending.placeholder_id.clone()),
        };
        if let Err(err) = self.store.save(&record, self.revision) {
            warn!(error = %err, "Could not save chat history");
        }
    }

    fn publish(&self) {
        self.updates.send_replace(self.snapshot());
    }
}
