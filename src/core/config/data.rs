use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const BASE_URL_ENV_VAR: &str = "PEUPAJOH_BASE_URL";

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Root URL of the nutrition agent, e.g. "http://localhost:8000"
    pub base_url: Option<String>,
    /// Deadline for response headers and for each pause between body reads
    pub request_timeout_secs: Option<u64>,
    /// Where the transcript is kept; defaults to the platform data directory
    pub history_path: Option<PathBuf>,
}

/// Values a run actually uses once the file, environment and flags are merged.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub history_path: Option<PathBuf>,
}

/// Overrides coming from the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

impl Config {
    /// Merge file values with `PEUPAJOH_BASE_URL` and command-line flags.
    /// Flags win over the environment, which wins over the file.
    pub fn resolve(&self, env_base_url: Option<String>, overrides: &ConfigOverrides) -> ResolvedConfig {
        let base_url = overrides
            .base_url
            .clone()
            .or(env_base_url)
            .or_else(|| self.base_url.clone())
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = overrides
            .request_timeout_secs
            .or(self.request_timeout_secs)
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        ResolvedConfig {
            base_url,
            request_timeout: Duration::from_secs(timeout_secs),
            history_path: self.history_path.clone(),
        }
    }

    pub fn resolve_from_env(&self, overrides: &ConfigOverrides) -> ResolvedConfig {
        self.resolve(std::env::var(BASE_URL_ENV_VAR).ok(), overrides)
    }
}

pub(crate) fn path_display(path: &Path) -> String {
    path.display().to_string()
}
