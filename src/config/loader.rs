//! Configuration loading with hierarchy merging.
//!
//! Sources, merged in order (missing files are skipped, malformed files fail
//! fast):
//!
//! 1. Embedded defaults
//! 2. System config: `/etc/modelgate/config.toml`
//! 3. User config: `~/.config/modelgate/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::Config;
use crate::cli::Cli;

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/modelgate/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "modelgate";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with hierarchy merging.
pub struct ConfigLoader {
    system_path: PathBuf,
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Loader over the default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Loader over custom paths (tests).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Load and merge configuration from every source.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        if let Some(system) = self.load_file(&self.system_path)? {
            config.merge(system);
            debug!("Merged system config from {:?}", self.system_path);
        }

        if let Some(user) = self.load_file(&self.user_path)? {
            config.merge(user);
            debug!("Merged user config from {:?}", self.user_path);
        }

        if let Some(extra_path) = &cli.config {
            // An explicitly named config must exist.
            let raw = fs::read_to_string(extra_path).map_err(|e| ConfigError::ReadError {
                path: extra_path.clone(),
                source: e,
            })?;
            let extra: Config = toml::from_str(&raw).map_err(|e| ConfigError::ParseError {
                path: extra_path.clone(),
                source: e,
            })?;
            config.merge(extra);
            debug!("Merged config from {:?}", extra_path);
        }

        // CLI flags win.
        if let Some(listen) = &cli.listen {
            config.gateway.listen = listen.clone();
        }
        if let Some(cert_dir) = &cli.cert_dir {
            config.gateway.cert_dir = Some(cert_dir.clone());
        }

        Ok(config)
    }

    /// Load one optional config file; absent files are `None`.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&raw)
            .map(Some)
            .map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                source: e,
            })
    }

    /// Resolved certificate directory: configured value or the user default.
    pub fn default_cert_dir(config: &Config) -> PathBuf {
        config.gateway.cert_dir.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .map(|p| p.join(USER_CONFIG_DIR).join("certs"))
                .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR).join("certs"))
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
