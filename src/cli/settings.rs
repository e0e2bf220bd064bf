//! `set` and `unset` for the config file.

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::config::{Config, ConfigError};

pub const SETTING_KEYS: [&str; 3] = ["base-url", "timeout", "history-path"];

/// Errors that can occur when changing a setting.
#[derive(Debug)]
pub enum SettingError {
    /// The key is not one of [`SETTING_KEYS`].
    UnknownKey(String),
    /// The value does not fit the key.
    InvalidValue { key: &'static str, value: String },
    /// Reading or writing the config file failed.
    Config(ConfigError),
}

impl fmt::Display for SettingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingError::UnknownKey(key) => write!(
                f,
                "Unknown config key: {key} (expected one of {})",
                SETTING_KEYS.join(", ")
            ),
            SettingError::InvalidValue { key, value } => {
                write!(f, "Invalid value for {key}: {value}")
            }
            SettingError::Config(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SettingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SettingError::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for SettingError {
    fn from(err: ConfigError) -> Self {
        SettingError::Config(err)
    }
}

/// Set `key` to `value`, or clear it when `value` is `None`.
pub fn apply_setting(config: &mut Config, key: &str, value: Option<&str>) -> Result<(), SettingError> {
    let value = value.map(str::trim);
    match key {
        "base-url" => match value {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                config.base_url = Some(url.to_string());
            }
            Some(url) => {
                return Err(SettingError::InvalidValue {
                    key: "base-url",
                    value: url.to_string(),
                })
            }
            None => config.base_url = None,
        },
        "timeout" => match value {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout_secs = Some(secs),
                _ => {
                    return Err(SettingError::InvalidValue {
                        key: "timeout",
                        value: raw.to_string(),
                    })
                }
            },
            None => config.request_timeout_secs = None,
        },
        "history-path" => match value {
            Some("") => {
                return Err(SettingError::InvalidValue {
                    key: "history-path",
                    value: String::new(),
                })
            }
            Some(path) => config.history_path = Some(PathBuf::from(path)),
            None => config.history_path = None,
        },
        other => return Err(SettingError::UnknownKey(other.to_string())),
    }
    Ok(())
}

pub fn describe(config: &Config) -> String {
    let unset = || "(unset)".to_string();
    format!(
        "base-url: {}\ntimeout: {}\nhistory-path: {}",
        config.base_url.clone().unwrap_or_else(unset),
        config
            .request_timeout_secs
            .map(|secs| format!("{secs}s"))
            .unwrap_or_else(unset),
        config
            .history_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(unset),
    )
}

/// Load the file at `config_path`, apply one change and write it back.
pub fn update_config_file(
    config_path: Option<&Path>,
    key: &str,
    value: Option<&str>,
) -> Result<PathBuf, SettingError> {
    let path = Config::resolve_path(config_path)?;
    let mut config = Config::load_from_path(&path)?;
    apply_setting(&mut config, key, value)?;
    config.save_to_path(&path)?;
    Ok(path)
}

pub fn run_set(config_path: Option<&Path>, key: Option<String>, value: Vec<String>) -> Result<(), Box<dyn Error>> {
    let value = value.join(" ");
    match key {
        Some(key) if !value.trim().is_empty() => {
            update_config_file(config_path, &key, Some(&value))?;
            println!("✅ Set {key} to: {}", value.trim());
        }
        _ => println!("{}", describe(&Config::load(config_path)?)),
    }
    Ok(())
}

pub fn run_unset(config_path: Option<&Path>, key: &str) -> Result<(), Box<dyn Error>> {
    update_config_file(config_path, key, None)?;
    println!("✅ Unset {key}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn settings_validate_their_values() {
        let mut config = Config::default();
        apply_setting(&mut config, "base-url", Some(" http://agent:9000 ")).unwrap();
        apply_setting(&mut config, "timeout", Some("15")).unwrap();
        apply_setting(&mut config, "history-path", Some("/tmp/h.json")).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://agent:9000"));
        assert_eq!(config.request_timeout_secs, Some(15));
        assert_eq!(config.history_path, Some(PathBuf::from("/tmp/h.json")));

        assert!(matches!(
            apply_setting(&mut config, "timeout", Some("0")),
            Err(SettingError::InvalidValue { key: "timeout", .. })
        ));
        assert!(matches!(
            apply_setting(&mut config, "base-url", Some("agent:9000")),
            Err(SettingError::InvalidValue { key: "base-url", .. })
        ));
        let err = apply_setting(&mut config, "model", Some("x")).unwrap_err();
        assert!(err.to_string().contains("base-url, timeout, history-path"));
        assert_eq!(config.request_timeout_secs, Some(15));

        apply_setting(&mut config, "timeout", None).unwrap();
        assert_eq!(config.request_timeout_secs, None);
    }

    #[test]
    fn updates_are_written_to_the_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        update_config_file(Some(&path), "base-url", Some("https://agent.example")).unwrap();
        update_config_file(Some(&path), "timeout", Some("90")).unwrap();
        let saved = Config::load_from_path(&path).unwrap();
        assert_eq!(saved.base_url.as_deref(), Some("https://agent.example"));
        assert_eq!(saved.request_timeout_secs, Some(90));

        update_config_file(Some(&path), "base-url", None).unwrap();
        let saved = Config::load_from_path(&path).unwrap();
        assert_eq!(saved.base_url, None);
        assert_eq!(saved.request_timeout_secs, Some(90));
        assert!(describe(&saved).contains("base-url: (unset)"));
    }

    #[test]
    fn rejected_values_leave_the_file_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        update_config_file(Some(&path), "timeout", Some("30")).unwrap();

        assert!(update_config_file(Some(&path), "timeout", Some("later")).is_err());
        assert_eq!(
            Config::load_from_path(&path).unwrap().request_timeout_secs,
            Some(30)
        );
    }
}
