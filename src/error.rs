use std::path::PathBuf;

use thiserror::Error;

/// Errors that can prevent the server from starting at all.
///
/// Every variant here is fatal: the process logs it and exits non-zero
/// rather than trying to run with a partially-valid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("config is missing required key `{0}`")]
    MissingKey(String),

    #[error("config key `{0}` is not a valid duration: {1}")]
    Duration(String, #[source] humantime::DurationError),
}
