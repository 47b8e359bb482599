//! Configuration errors.

use std::path::PathBuf;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly named config file does not exist.
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// A source failed to read or deserialize.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] config::ConfigError),
}
