//! Diagnostic logging setup.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_ENV_VAR: &str = "PEUPAJOH_LOG";
const DEFAULT_FILTER: &str = "warn";

/// Filter from `PEUPAJOH_LOG`, falling back to `warn` when unset or invalid.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
///
/// Logs go to `log_file` (appended, no ANSI colors) when given, otherwise to
/// stderr so they never mix with replies printed on stdout. A second call
/// leaves the first subscriber in place.
pub fn init_logging(log_file: Option<&Path>) -> std::io::Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter());

    let installed = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(
                    fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false)
                        .with_target(true),
                )
                .try_init()
        }
        None => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
    Ok(())
}
