//! Configuration management for Warden
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (`WARDEN_*` prefix, highest precedence)
//! 2. `warden.local.toml` (gitignored, local overrides)
//! 3. `warden.toml` (git-tracked, deployment config)
//! 4. Built-in defaults (lowest precedence)
//!
//! The engine strategy is decided here, once, at startup; the process
//! constructs the matching access manager and injects it everywhere. No
//! global instance, no runtime switching.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

/// Main Warden configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

/// Which rights-evaluation strategy the process runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Full grant-based evaluation with delegation.
    #[default]
    Acl,
    /// System admins only; no delegated administration.
    GlobalAdminOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub strategy: Strategy,
    /// Directory of right-definition TOML files. When unset, only the
    /// built-in core rights are available and reload is unsupported.
    pub rights_dir: Option<PathBuf>,
    /// Attribute schema file. When unset, the built-in schema is used.
    pub schema_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Acl,
            rights_dir: None,
            schema_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Tracing filter directive, e.g. `info` or `warden_engine=debug`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_acl_with_builtin_data() {
        let config = WardenConfig::default();
        assert_eq!(config.engine.strategy, Strategy::Acl);
        assert!(config.engine.rights_dir.is_none());
        assert!(config.engine.schema_file.is_none());
        assert_eq!(config.logging.level, "info");
    }
}
