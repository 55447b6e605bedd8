use std::path::PathBuf;

use thiserror::Error;

/// Configuration-loading failures (spec §6: "every required key missing is
/// fatal"). Every variant carries enough context for a startup-time log line
/// without the caller needing to reconstruct it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    Io(PathBuf, String),
    #[error("failed to parse INI config '{0}': {1}")]
    Parse(PathBuf, String),
    #[error("config section '[{0}]' is missing")]
    MissingSection(&'static str),
    #[error("missing required key '{section}.{key}'")]
    MissingKey { section: &'static str, key: &'static str },
    #[error("invalid value for '{section}.{key}': {reason}")]
    InvalidValue { section: &'static str, key: &'static str, reason: String },
}
