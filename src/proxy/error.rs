//! Error types for proxy operations.
//!
//! Every error maps to a client-facing status code, returned on the
//! client leg before the connection closes:
//! malformed request → 400, unmatched path → 404, oversized body → 413,
//! unreachable/erroring upstream → 502.

use http::StatusCode;
use thiserror::Error;

/// Unified error type for proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error (socket operations, file access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// The request line or CONNECT authority is malformed.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// No path table entry matched the request path.
    #[error("No route for path '{0}'")]
    UnmatchedPath(String),

    /// The inbound body exceeded the configured cap.
    #[error("Request body exceeds the {limit}-byte limit")]
    BodyTooLarge {
        /// Configured cap in bytes.
        limit: usize,
    },

    /// Failed to reach the upstream server.
    #[error("Failed to connect to upstream '{addr}': {message}")]
    UpstreamConnect {
        /// Address of the unreachable upstream.
        addr: String,
        /// Description of the failure.
        message: String,
    },

    /// The upstream connection errored mid-request.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// TLS error during handshake or certificate operations.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Certificate issuance failed.
    #[error("Certificate error: {0}")]
    Cert(#[from] crate::ca::CaError),

    /// An input pipeline step failed; the request is aborted.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    /// Route resolution failed (dangling destination).
    #[error("Routing error: {0}")]
    Mux(#[from] crate::mux::MuxError),

    /// A collaborator (provider execution) failed.
    #[error("Provider error: {0}")]
    Collab(#[from] crate::collab::CollabError),
}

impl ProxyError {
    /// The status code to answer the client with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnmatchedPath(_) => StatusCode::NOT_FOUND,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UpstreamConnect { .. } | Self::Upstream(_) | Self::Collab(_) | Self::Mux(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Io(_) | Self::Http(_) | Self::Tls(_) | Self::Cert(_) | Self::Pipeline(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::MalformedRequest("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::UnmatchedPath("/x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProxyError::BodyTooLarge { limit: 10 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ProxyError::UpstreamConnect {
                addr: "api.example.com:443".into(),
                message: "refused".into()
            }
            .status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_upstream_error_display() {
        let err = ProxyError::UpstreamConnect {
            addr: "api.example.com:443".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("api.example.com:443"));
        assert!(err.to_string().contains("connection refused"));
    }
}
