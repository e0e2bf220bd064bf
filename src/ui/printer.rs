//! Plain-text output for the line-oriented front ends.

use std::future::Future;
use std::io::{self, Write};

use chrono::Local;

use crate::core::message::Message;
use crate::core::session::{ChatSnapshot, RejectReason, SendOutcome, SessionController, TurnTicket};
use crate::ui::labels::numbered_actions;

/// Remembers how much of the reply being streamed was already written.
#[derive(Debug, Default)]
pub struct ReplyPrinter {
    reply_id: Option<String>,
    printed: usize,
}

impl ReplyPrinter {
    /// Follow the assistant placeholder at the end of `snapshot`.
    pub fn follow(&mut self, snapshot: &ChatSnapshot) {
        self.reply_id = snapshot
            .transcript
            .last()
            .filter(|message| message.is_assistant())
            .map(|message| message.id.clone());
        self.printed = 0;
    }

    /// Text that arrived since the last call.
    pub fn fresh_text<'a>(&mut self, snapshot: &'a ChatSnapshot) -> Option<&'a str> {
        let reply_id = self.reply_id.as_deref()?;
        let reply = snapshot
            .transcript
            .iter()
            .rev()
            .find(|message| message.id == reply_id)?;
        let fresh = reply.content.get(self.printed..)?;
        if fresh.is_empty() {
            return None;
        }
        self.printed = reply.content.len();
        Some(fresh)
    }

    pub fn printed_anything(&self) -> bool {
        self.printed > 0
    }
}

/// Drive an accepted turn, writing the reply to `out` as it streams in.
///
/// When `interrupt` resolves the turn is cancelled; it still settles
/// through the controller before this returns.
pub async fn stream_turn<W, I>(
    controller: &mut SessionController,
    ticket: TurnTicket,
    out: &mut W,
    interrupt: I,
) -> io::Result<SendOutcome>
where
    W: Write,
    I: Future<Output = ()>,
{
    let mut updates = controller.subscribe();
    let mut printer = ReplyPrinter::default();
    printer.follow(&controller.snapshot());
    let cancel_token = ticket.cancel_token.clone();
    let mut write_error = None;

    let outcome = {
        let drive = controller.drive_turn(ticket);
        tokio::pin!(drive);
        tokio::pin!(interrupt);
        let mut interrupted = false;

        loop {
            tokio::select! {
                outcome = &mut drive => break outcome,
                Ok(()) = updates.changed() => {
                    let snapshot = updates.borrow_and_update().clone();
                    if let Some(text) = printer.fresh_text(&snapshot) {
                        if write_error.is_none() {
                            write_error = write_chunk(out, text).err();
                        }
                    }
                }
                _ = &mut interrupt, if !interrupted => {
                    interrupted = true;
                    cancel_token.cancel();
                }
            }
        }
    };

    if let Some(text) = printer.fresh_text(&controller.snapshot()) {
        if write_error.is_none() {
            write_error = write_chunk(out, text).err();
        }
    }
    if let Some(err) = write_error {
        return Err(err);
    }
    if printer.printed_anything() {
        writeln!(out)?;
    }
    Ok(outcome)
}

/// Resolves on Ctrl+C; never, when the signal cannot be watched.
pub async fn interrupt() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn write_chunk<W: Write>(out: &mut W, text: &str) -> io::Result<()> {
    out.write_all(text.as_bytes())?;
    out.flush()
}

/// Report how a turn ended, plus any suggestions the agent offered.
pub fn write_outcome<W: Write>(
    out: &mut W,
    outcome: &SendOutcome,
    snapshot: &ChatSnapshot,
) -> io::Result<()> {
    match outcome {
        SendOutcome::Completed => {}
        SendOutcome::Failed(_) => {
            if let Some(error) = &snapshot.error {
                writeln!(out, "❌ {error}")?;
            }
        }
        SendOutcome::Rejected(RejectReason::Busy) => {
            writeln!(out, "⚠️  Still waiting on the previous reply")?;
        }
        SendOutcome::Rejected(RejectReason::NotReady) => {
            writeln!(out, "⚠️  Chat history is still loading")?;
        }
        SendOutcome::Rejected(RejectReason::Empty) => {}
    }
    if !snapshot.suggested_actions.is_empty() {
        writeln!(out, "💡 {}", numbered_actions(&snapshot.suggested_actions))?;
    }
    Ok(())
}

pub fn format_message(message: &Message) -> String {
    let time = message.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    let speaker = if message.is_user() { "you" } else { "agent" };
    format!("[{time}] {speaker}: {}", message.content)
}

pub fn write_transcript<W: Write>(out: &mut W, transcript: &[Message]) -> io::Result<()> {
    if transcript.is_empty() {
        writeln!(out, "No chat history yet.")?;
        return Ok(());
    }
    for message in transcript {
        writeln!(out, "{}", format_message(message))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chat_stream::HttpChatTransport;
    use crate::core::session::{ChatState, SessionInfo};
    use crate::core::transcript_store::MemoryTranscriptStore;
    use crate::utils::test_utils::{create_test_messages, spawn_mock_server, MockResponse};
    use std::sync::Arc;
    use std::time::Duration;

    fn snapshot_with(transcript: Vec<Message>) -> ChatSnapshot {
        ChatSnapshot {
            transcript,
            state: ChatState::Streaming,
            is_loading: true,
            error: None,
            suggested_actions: Vec::new(),
            session: SessionInfo {
                session_id: "session-1".into(),
                state: Default::default(),
            },
            revision: 1,
        }
    }

    #[test]
    fn printer_only_emits_new_text() {
        let mut reply = Message::assistant_placeholder();
        let mut printer = ReplyPrinter::default();
        printer.follow(&snapshot_with(vec![Message::user("hi"), reply.clone()]));

        reply.content = "Hel".into();
        let first = snapshot_with(vec![Message::user("hi"), reply.clone()]);
        assert_eq!(printer.fresh_text(&first), Some("Hel"));
        assert_eq!(printer.fresh_text(&first), None);

        reply.content = "Hello 🍚".into();
        let second = snapshot_with(vec![Message::user("hi"), reply]);
        assert_eq!(printer.fresh_text(&second), Some("lo 🍚"));
    }

    #[test]
    fn printer_ignores_snapshots_without_a_reply() {
        let mut printer = ReplyPrinter::default();
        printer.follow(&snapshot_with(vec![Message::user("hi")]));
        assert_eq!(printer.fresh_text(&snapshot_with(create_test_messages())), None);
        assert!(!printer.printed_anything());
    }

    #[tokio::test]
    async fn streamed_reply_is_written_in_full() {
        let server = spawn_mock_server(vec![MockResponse::text_chunks(&[
            "Nasi goreng ",
            "is about ",
            "350 kcal.",
        ])
        .with_header("X-Next-Actions", r#"["log_meal","view_summary"]"#)])
        .await;
        let transport = Arc::new(HttpChatTransport::new(
            reqwest::Client::new(),
            server.base_url.clone(),
            Duration::from_secs(5),
        ));
        let mut controller =
            SessionController::new(transport, Box::new(MemoryTranscriptStore::new()));
        controller.initialize();

        let ticket = controller.begin_turn("nasi goreng").unwrap();
        let mut out = Vec::new();
        let outcome = stream_turn(&mut controller, ticket, &mut out, std::future::pending())
            .await
            .unwrap();
        write_outcome(&mut out, &outcome, &controller.snapshot()).unwrap();

        assert_eq!(outcome, SendOutcome::Completed);
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(
            printed,
            "Nasi goreng is about 350 kcal.\n💡 [1] Log Meal  [2] View Summary\n"
        );
        server.finish().await;
    }

    #[tokio::test]
    async fn interrupt_cancels_the_turn() {
        let server = spawn_mock_server(vec![MockResponse::stall()]).await;
        let transport = Arc::new(HttpChatTransport::new(
            reqwest::Client::new(),
            server.base_url.clone(),
            Duration::from_secs(10),
        ));
        let mut controller =
            SessionController::new(transport, Box::new(MemoryTranscriptStore::new()));
        controller.initialize();

        let ticket = controller.begin_turn("2 eggs").unwrap();
        let mut out = Vec::new();
        let outcome = stream_turn(
            &mut controller,
            ticket,
            &mut out,
            tokio::time::sleep(Duration::from_millis(100)),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, SendOutcome::Failed(_)));
        assert_eq!(controller.state(), ChatState::Idle);
        assert_eq!(controller.transcript().len(), 1);
        write_outcome(&mut out, &outcome, &controller.snapshot()).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "❌ Reply cancelled\n"
        );
        server.abort();
    }

    #[test]
    fn transcript_lists_speakers_in_order() {
        let mut out = Vec::new();
        write_transcript(&mut out, &create_test_messages()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with("you: Sarapan nasi goreng 2 porsi"));
        assert!(lines[1].contains("agent: Nasi goreng"));

        let mut empty = Vec::new();
        write_transcript(&mut empty, &[]).unwrap();
        assert_eq!(String::from_utf8(empty).unwrap(), "No chat history yet.\n");
    }
}
