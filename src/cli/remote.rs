//! Commands that only talk to the agent's session endpoints.

use std::error::Error;
use std::io::{self, Write};

use serde_json::Value;

use crate::api::{SessionInfoResponse, SessionListResponse};
use crate::cli::ChatContext;

pub async fn check_health(context: &ChatContext) -> Result<(), Box<dyn Error>> {
    match context.endpoints().health().await {
        Ok(health) => {
            println!("✅ {} is {} (version {})", context.config.base_url, health.status, health.version);
            if !health.message.is_empty() {
                println!("   {}", health.message);
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("❌ {} is not reachable: {}", context.config.base_url, err.user_message());
            std::process::exit(1);
        }
    }
}

/// Foods and questions are free-form objects; show the most telling field.
fn describe_item(item: &Value) -> String {
    match item {
        Value::String(text) => text.clone(),
        Value::Object(fields) => {
            let name = ["name", "food", "question", "message"]
                .iter()
                .find_map(|key| fields.get(*key).and_then(Value::as_str));
            let quantity = ["quantity", "portion", "amount"]
                .iter()
                .find_map(|key| fields.get(*key))
                .map(|value| match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                });
            match (name, quantity) {
                (Some(name), Some(quantity)) => format!("{name} ({quantity})"),
                (Some(name), None) => name.to_string(),
                _ => item.to_string(),
            }
        }
        other => other.to_string(),
    }
}

pub fn write_session_info<W: Write>(out: &mut W, info: &SessionInfoResponse) -> io::Result<()> {
    writeln!(out, "Agent state: {}", info.current_state)?;
    if let Some(updated_at) = &info.updated_at {
        writeln!(out, "Last updated: {updated_at}")?;
    }
    if !info.extracted_foods.is_empty() {
        writeln!(out, "Foods:")?;
        for food in &info.extracted_foods {
            writeln!(out, "  - {}", describe_item(food))?;
        }
    }
    if !info.pending_clarifications.is_empty() {
        writeln!(out, "Waiting on:")?;
        for question in &info.pending_clarifications {
            writeln!(out, "  ? {}", describe_item(question))?;
        }
    }
    if info.has_analysis {
        writeln!(out, "Analysis: ready")?;
    }
    Ok(())
}

pub fn write_session_list<W: Write>(
    out: &mut W,
    list: &SessionListResponse,
    current: &str,
) -> io::Result<()> {
    if list.sessions.is_empty() {
        return writeln!(out, "The agent has no sessions.");
    }
    for session in &list.sessions {
        let marker = if session.session_id == current { "*" } else { " " };
        write!(out, "{marker} {} ({})", session.session_id, session.current_state)?;
        match &session.updated_at {
            Some(updated_at) => writeln!(out, " {updated_at}")?,
            None => writeln!(out)?,
        }
    }
    writeln!(out, "{} total", list.total.max(list.sessions.len()))
}

pub async fn show_session(context: &ChatContext) -> Result<(), Box<dyn Error>> {
    let mut controller = context.controller()?;
    controller.initialize();
    let session_id = controller.session_id().to_string();

    println!("Session: {session_id}");
    println!("Messages: {}", controller.transcript().len());
    match context.endpoints().info(&session_id).await {
        Ok(info) => write_session_info(&mut io::stdout(), &info)?,
        Err(err) => println!("Agent state: unavailable ({})", err.user_message()),
    }
    Ok(())
}

pub async fn list_sessions(context: &ChatContext) -> Result<(), Box<dyn Error>> {
    let mut controller = context.controller()?;
    controller.initialize();

    let list = context.endpoints().list().await?;
    write_session_list(&mut io::stdout(), &list, controller.session_id())?;
    Ok(())
}

/// Delete `session_id` on the agent, or the current session when `None`.
/// The local transcript is left alone.
pub async fn delete_session(
    context: &ChatContext,
    session_id: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let session_id = match session_id {
        Some(id) => id,
        None => {
            let mut controller = context.controller()?;
            controller.initialize();
            controller.session_id().to_string()
        }
    };
    context.endpoints().delete(&session_id).await?;
    println!("✅ Deleted session {session_id} on the agent");
    Ok(())
}
