//! Layered configuration loading.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use tracing::debug;

use crate::{ConfigError, WardenConfig};

/// Loads [`WardenConfig`] from files and the environment.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    base_dir: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks for `warden.toml` / `warden.local.toml` in this directory
    /// instead of the current one.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Loads configuration from all sources, lowest precedence first:
    /// defaults, `warden.toml`, `warden.local.toml`, environment.
    ///
    /// Missing files are fine; a present-but-broken file is an error.
    pub fn load(&self) -> Result<WardenConfig, ConfigError> {
        let base = self.base_dir.clone().unwrap_or_else(|| PathBuf::from("."));

        let config = Config::builder()
            .add_source(
                File::from(base.join("warden.toml"))
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                File::from(base.join("warden.local.toml"))
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::with_prefix("WARDEN").separator("__"))
            .build()?;

        let config: WardenConfig = config.try_deserialize()?;
        debug!(strategy = ?config.engine.strategy, "configuration loaded");
        Ok(config)
    }

    /// Loads exactly one named file (plus environment overrides). The
    /// file must exist.
    pub fn load_file(path: impl AsRef<Path>) -> Result<WardenConfig, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let config = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .add_source(Environment::with_prefix("WARDEN").separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use crate::Strategy;

    use super::*;

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::new().with_base_dir(dir.path()).load().unwrap();
        assert_eq!(config.engine.strategy, Strategy::Acl);
    }

    #[test]
    fn local_file_overrides_base_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = std::fs::File::create(dir.path().join("warden.toml")).unwrap();
        writeln!(
            base,
            "[engine]\nstrategy = \"acl\"\nrights_dir = \"/etc/warden/rights\""
        )
        .unwrap();
        let mut local = std::fs::File::create(dir.path().join("warden.local.toml")).unwrap();
        writeln!(local, "[engine]\nstrategy = \"global-admin-only\"").unwrap();

        let config = ConfigLoader::new().with_base_dir(dir.path()).load().unwrap();
        assert_eq!(config.engine.strategy, Strategy::GlobalAdminOnly);
        assert_eq!(
            config.engine.rights_dir.as_deref(),
            Some(std::path::Path::new("/etc/warden/rights"))
        );
    }

    #[test]
    fn named_file_must_exist() {
        let result = ConfigLoader::load_file("/definitely/not/here/warden.toml");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
