//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod history;
pub mod remote;
pub mod say;
pub mod settings;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::api::sessions::SessionEndpoints;
use crate::core::chat_stream::HttpChatTransport;
use crate::core::config::{Config, ConfigOverrides, ResolvedConfig};
use crate::core::session::SessionController;
use crate::core::transcript_store::{FileTranscriptStore, MemoryTranscriptStore, TranscriptStore};
use crate::ui::repl::run_chat;
use crate::utils::logging::init_logging;
use crate::utils::url::normalize_base_url;

#[derive(Parser)]
#[command(name = "peupajoh")]
#[command(about = "Chat with the Peupajoh nutrition agent from the terminal")]
#[command(
    long_about = "Peupajoh is a terminal chat client for a food-tracking and nutrition agent. \
Describe what you ate and the agent replies with calorie estimates and advice, \
streamed as it is written.\n\n\
Environment Variables:\n\
  PEUPAJOH_BASE_URL   Agent URL (overridden by --base-url, defaults to http://localhost:8000)\n\
  PEUPAJOH_LOG        Log filter, e.g. 'debug' or 'peupajoh_chat=trace' (defaults to warn)\n\n\
Chat commands:\n\
  /history          Show the conversation so far\n\
  /clear            Forget the conversation and start a new session\n\
  /session          Show the session id, agent state and suggestions\n\
  /1, /2, ...       Send one of the suggested actions\n\
  /quit             Leave the chat\n\
  Ctrl+C            Cancel a reply that is still streaming"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Agent URL, overriding the config file and PEUPAJOH_BASE_URL
    #[arg(short = 'u', long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// Seconds to wait for the agent before giving up
    #[arg(short = 't', long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Write diagnostic logs to this file instead of stderr
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Read settings from this file instead of the platform config directory
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Keep the conversation in memory only
    #[arg(short = 'e', long, global = true)]
    pub ephemeral: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the interactive chat (default)
    Chat,
    /// Send one message and print the reply
    Say {
        /// Message to send
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// Print the saved conversation
    History,
    /// Forget the saved conversation and start a new session
    Clear,
    /// Check whether the agent is reachable
    Health,
    /// Show what the agent knows about the current session
    Session,
    /// List every session the agent knows about
    Sessions,
    /// Delete a session on the agent (the current one by default)
    DeleteSession {
        /// Session to delete
        session_id: Option<String>,
    },
    /// Set a config value (base-url, timeout, history-path); prints the config without one
    Set {
        /// Configuration key to set
        key: Option<String>,
        /// Value for the key
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Remove a config value
    Unset {
        /// Configuration key to unset
        key: String,
    },
}

/// Everything a command needs to reach the agent and the saved transcript.
pub struct ChatContext {
    pub config: ResolvedConfig,
    pub client: reqwest::Client,
    pub ephemeral: bool,
}

impl ChatContext {
    pub fn new(config: ResolvedConfig, ephemeral: bool) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            ephemeral,
        }
    }

    pub fn store(&self) -> Result<Box<dyn TranscriptStore>, Box<dyn Error>> {
        if self.ephemeral {
            return Ok(Box::new(MemoryTranscriptStore::new()));
        }
        let path = match &self.config.history_path {
            Some(path) => path.clone(),
            None => FileTranscriptStore::default_path()
                .ok_or("Failed to determine data directory for chat history")?,
        };
        Ok(Box::new(FileTranscriptStore::new(path)))
    }

    pub fn controller(&self) -> Result<SessionController, Box<dyn Error>> {
        let transport = HttpChatTransport::new(
            self.client.clone(),
            self.config.base_url.clone(),
            self.config.request_timeout,
        );
        Ok(SessionController::new(Arc::new(transport), self.store()?))
    }

    pub fn endpoints(&self) -> SessionEndpoints {
        SessionEndpoints::new(
            self.client.clone(),
            self.config.base_url.clone(),
            self.config.request_timeout,
        )
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let Args {
        command,
        base_url,
        timeout,
        log,
        config,
        ephemeral,
    } = Args::parse();
    init_logging(log.as_deref())?;

    let context = || -> Result<ChatContext, Box<dyn Error>> {
        let loaded = Config::load(config.as_deref())?;
        let mut resolved = loaded.resolve_from_env(&ConfigOverrides {
            base_url: base_url.clone(),
            request_timeout_secs: timeout,
        });
        resolved.base_url = normalize_base_url(&resolved.base_url);
        Ok(ChatContext::new(resolved, ephemeral))
    };

    match command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            let context = context()?;
            run_chat(context.controller()?, context.endpoints()).await
        }
        Commands::Say { prompt } => say::run_say(prompt, &context()?).await,
        Commands::History => history::print_history(&context()?),
        Commands::Clear => history::clear_history(&context()?).await,
        Commands::Health => remote::check_health(&context()?).await,
        Commands::Session => remote::show_session(&context()?).await,
        Commands::Sessions => remote::list_sessions(&context()?).await,
        Commands::DeleteSession { session_id } => {
            remote::delete_session(&context()?, session_id).await
        }
        Commands::Set { key, value } => settings::run_set(config.as_deref(), key, value),
        Commands::Unset { key } => settings::run_unset(config.as_deref(), &key),
    }
}
