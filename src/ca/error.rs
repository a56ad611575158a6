//! Error types for certificate authority operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors related to CA and domain certificate operations.
///
/// These errors occur when generating the root CA, issuing domain
/// certificates, or managing certificate files on disk.
#[derive(Debug, Error)]
pub enum CaError {
    /// Failed to create the certificate directory.
    #[error("Failed to create certificate directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to set file permissions.
    #[error("Failed to set permissions: {0}")]
    Permissions(#[source] std::io::Error),

    /// Failed to generate a key pair.
    #[error("Failed to generate key pair: {0}")]
    KeyGeneration(String),

    /// Failed to generate a certificate.
    #[error("Failed to generate certificate: {0}")]
    CertGeneration(String),

    /// Failed to sign a certificate with the CA key.
    #[error("Failed to sign certificate: {0}")]
    Signing(String),

    /// Failed to read a certificate or key file.
    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        /// File that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to write a certificate or key file.
    #[error("Failed to write file {path}: {source}")]
    WriteFile {
        /// File that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A PEM file on disk is malformed.
    #[error("Malformed PEM in {path}: {message}")]
    MalformedPem {
        /// File containing the malformed PEM.
        path: PathBuf,
        /// Description of the parse failure.
        message: String,
    },

    /// A certificate does not verify against the active CA.
    #[error("Certificate for '{domain}' does not verify against the active CA: {message}")]
    Verification {
        /// Domain the certificate was issued for.
        domain: String,
        /// Description of the verification failure.
        message: String,
    },

    /// The domain name is not usable for certificate issuance.
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    /// No CA material is present on disk.
    #[error("No CA material found under {0}")]
    MissingCa(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ca_error_display() {
        let err = CaError::KeyGeneration("random number generator failed".to_string());
        assert!(err.to_string().contains("random number generator failed"));
    }

    #[test]
    fn test_verification_error_display() {
        let err = CaError::Verification {
            domain: "api.example.com".to_string(),
            message: "unknown issuer".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("api.example.com"));
        assert!(msg.contains("unknown issuer"));
    }
}
