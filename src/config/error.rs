//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the file that couldn't be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse a TOML configuration file.
    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the file that couldn't be parsed.
        path: PathBuf,
        /// The underlying TOML parse error.
        source: toml::de::Error,
    },

    /// A configuration value is invalid.
    #[error("Invalid config value for {field}: {message}")]
    InvalidValue {
        /// The field with the invalid value.
        field: String,
        /// Why the value is invalid.
        message: String,
    },

    /// A workspace rule could not be compiled.
    #[error("Invalid mux rule in workspace '{workspace}': {source}")]
    InvalidRule {
        /// Workspace the rule belongs to.
        workspace: String,
        /// The underlying rule error.
        source: crate::mux::MuxError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_display() {
        let err = ConfigError::InvalidValue {
            field: "gateway.listen".to_string(),
            message: "not a socket address".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("gateway.listen"));
        assert!(msg.contains("not a socket address"));
    }
}
