//! Error types for the secrets redaction engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from signature loading and session cryptography.
///
/// Note that *decryption* failures are deliberately not represented here:
/// restoration fails closed by leaving the marker redacted (§ confidentiality
/// over convenience), so the decrypt path returns `Option` instead of
/// surfacing an error.
#[derive(Debug, Error)]
pub enum SecretsError {
    /// Failed to read the signature rule file.
    #[error("Failed to read signature file {path}: {source}")]
    SignatureRead {
        /// Path to the unreadable rule file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the signature rule file.
    #[error("Failed to parse signature file {path}: {source}")]
    SignatureParse {
        /// Path to the malformed rule file.
        path: PathBuf,
        /// The underlying TOML parse error.
        source: toml::de::Error,
    },

    /// A rule contains an invalid regular expression.
    #[error("Invalid pattern '{name}' for service '{service}': {message}")]
    InvalidPattern {
        /// Service group of the pattern.
        service: String,
        /// Name of the pattern.
        name: String,
        /// Description of the regex error.
        message: String,
    },

    /// The referenced session does not exist or has expired.
    #[error("Unknown or expired secrets session {0}")]
    UnknownSession(uuid::Uuid),

    /// Encryption of a secret failed.
    #[error("Failed to encrypt secret: {0}")]
    Encryption(String),
}
