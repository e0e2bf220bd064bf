//! Interactive line-based chat loop.

use std::error::Error;
use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::api::sessions::SessionEndpoints;
use crate::core::session::{RejectReason, SendOutcome, SessionController};
use crate::ui::labels::{display_label, numbered_actions};
use crate::ui::printer::{interrupt, stream_turn, write_outcome, write_transcript};

const HELP_TEXT: &str = "\
Commands:
  /history          Show the conversation so far
  /clear            Forget the conversation and start a new session
  /session          Show the session id, agent state and suggestions
  /1, /2, ...       Send one of the suggested actions
  /help             Show this help
  /quit             Leave the chat
Ctrl+C while a reply is streaming cancels it; at the prompt it quits.
Errors are shown once and then dismissed.";

#[derive(Debug, PartialEq, Eq)]
pub enum ReplInput<'a> {
    Empty,
    Message(&'a str),
    Suggestion(usize),
    History,
    Clear,
    Session,
    Help,
    Quit,
    Unknown(&'a str),
}

pub fn parse_input(line: &str) -> ReplInput<'_> {
    let line = line.trim();
    if line.is_empty() {
        return ReplInput::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ReplInput::Message(line);
    };
    match command.trim() {
        "history" => ReplInput::History,
        "clear" => ReplInput::Clear,
        "session" => ReplInput::Session,
        "help" | "?" => ReplInput::Help,
        "quit" | "exit" | "q" => ReplInput::Quit,
        other => match other.parse::<usize>() {
            Ok(number) if number > 0 => ReplInput::Suggestion(number),
            _ => ReplInput::Unknown(line),
        },
    }
}

/// Tell the agent to forget `session_id`. Failures are only logged.
pub async fn reset_remote_session(endpoints: &SessionEndpoints, session_id: &str) {
    if let Err(err) = endpoints.reset(session_id).await {
        warn!(session_id, error = %err, "Remote session reset failed");
    }
}

/// Print how the turn ended; the error banner is dismissed once shown.
fn report_outcome<W: Write>(
    out: &mut W,
    controller: &mut SessionController,
    outcome: &SendOutcome,
) -> io::Result<()> {
    write_outcome(out, outcome, &controller.snapshot())?;
    controller.dismiss_error();
    Ok(())
}

pub async fn run_chat(
    mut controller: SessionController,
    endpoints: SessionEndpoints,
) -> Result<(), Box<dyn Error>> {
    controller.initialize();

    let mut stdout = io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    writeln!(
        stdout,
        "🥗 Peupajoh chat at {} (type /help for commands)",
        endpoints.base_url()
    )?;
    let restored = controller.transcript().len();
    if restored > 0 {
        writeln!(stdout, "Restored {restored} messages; /history shows them.")?;
    }

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = interrupt() => None,
        };
        let Some(line) = line else {
            writeln!(stdout)?;
            break;
        };

        match parse_input(&line) {
            ReplInput::Empty => {}
            ReplInput::Quit => break,
            ReplInput::Help => writeln!(stdout, "{HELP_TEXT}")?,
            ReplInput::History => write_transcript(&mut stdout, controller.transcript())?,
            ReplInput::Session => {
                let snapshot = controller.snapshot();
                writeln!(
                    stdout,
                    "Session {} ({})",
                    snapshot.session.session_id, snapshot.session.state
                )?;
                match endpoints.state(&snapshot.session.session_id).await {
                    Ok(remote) => writeln!(stdout, "Agent state: {}", remote.current_state)?,
                    Err(err) => {
                        writeln!(stdout, "Agent state: unavailable ({})", err.user_message())?
                    }
                }
                if !snapshot.suggested_actions.is_empty() {
                    writeln!(stdout, "💡 {}", numbered_actions(&snapshot.suggested_actions))?;
                }
            }
            ReplInput::Clear => match controller.clear_history() {
                Ok(previous) => {
                    if previous != controller.session_id() {
                        reset_remote_session(&endpoints, &previous).await;
                    }
                    writeln!(stdout, "History cleared.")?;
                }
                Err(_) => writeln!(stdout, "⚠️  Wait for the current reply to finish")?,
            },
            ReplInput::Suggestion(number) => {
                let Some(token) = controller.suggested_actions().get(number - 1).cloned() else {
                    writeln!(stdout, "⚠️  No suggestion numbered {number}")?;
                    continue;
                };
                writeln!(stdout, "→ {}", display_label(&token))?;
                let outcome = match controller.begin_suggested_turn(&token) {
                    Ok(ticket) => stream_turn(&mut controller, ticket, &mut stdout, interrupt()).await?,
                    Err(reason) => SendOutcome::Rejected(reason),
                };
                report_outcome(&mut stdout, &mut controller, &outcome)?;
            }
            ReplInput::Message(text) => {
                let outcome = match controller.begin_turn(text) {
                    Ok(ticket) => stream_turn(&mut controller, ticket, &mut stdout, interrupt()).await?,
                    Err(RejectReason::Empty) => continue,
                    Err(reason) => SendOutcome::Rejected(reason),
                };
                report_outcome(&mut stdout, &mut controller, &outcome)?;
            }
            ReplInput::Unknown(command) => {
                writeln!(stdout, "⚠️  Unknown command {command}; /help lists commands")?;
            }
        }
    }

    Ok(())
}
