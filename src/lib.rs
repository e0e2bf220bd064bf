//! Peupajoh is a terminal chat client for a food-tracking and nutrition agent.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the conversation: the session state machine, the streaming
//!   transport, transcript persistence, suggested actions, and configuration.
//! - [`api`] defines the agent's wire payloads, the response envelope codec,
//!   and the session-level endpoints.
//! - [`ui`] prints streamed replies and runs the interactive line loop.
//! - [`utils`] holds id generation, URL helpers, and logging setup.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`], which loads configuration and dispatches into
//! [`ui::repl`] for interactive sessions.

pub mod api;
pub mod cli;
pub mod core;
pub mod ui;
pub mod utils;
