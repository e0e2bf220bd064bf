use std::error::Error;
use std::io;

use crate::cli::ChatContext;
use crate::ui::printer::write_transcript;
use crate::ui::repl::reset_remote_session;

pub fn print_history(context: &ChatContext) -> Result<(), Box<dyn Error>> {
    let mut controller = context.controller()?;
    controller.initialize();
    write_transcript(&mut io::stdout(), controller.transcript())?;
    Ok(())
}

pub async fn clear_history(context: &ChatContext) -> Result<(), Box<dyn Error>> {
    let mut controller = context.controller()?;
    controller.initialize();

    match controller.clear_history() {
        Ok(previous) => {
            if previous != controller.session_id() {
                reset_remote_session(&context.endpoints(), &previous).await;
            }
            println!("✅ Chat history cleared");
            Ok(())
        }
        Err(reason) => Err(format!("Could not clear chat history ({reason:?})").into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ResolvedConfig;
    use crate::core::transcript_store::{FileTranscriptStore, PersistedTranscript, TranscriptStore};
    use crate::utils::test_utils::{create_test_messages, spawn_mock_server, MockResponse};
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn clearing_erases_the_file_and_resets_the_agent_session() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        FileTranscriptStore::new(&path)
            .save(
                &PersistedTranscript {
                    session_id: Some("session-old".into()),
                    messages: create_test_messages(),
                    pending_reply: None,
                },
                1,
            )
            .unwrap();

        let server =
            spawn_mock_server(vec![MockResponse::json(200, r#"{"success":true}"#)]).await;
        let context = ChatContext::new(
            ResolvedConfig {
                base_url: server.base_url.clone(),
                request_timeout: Duration::from_secs(5),
                history_path: Some(path.clone()),
            },
            false,
        );

        clear_history(&context).await.unwrap();

        assert!(!path.exists());
        let requests = server.finish().await;
        assert_eq!(
            requests[0].request_line,
            "POST /api/v1/sessions/session-old/reset HTTP/1.1"
        );
    }
}
