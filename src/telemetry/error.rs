//! Telemetry error types.

use thiserror::Error;

/// Errors from audit logging setup.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Could not connect to the local syslog daemon.
    #[error("Failed to connect to syslog: {0}")]
    SyslogConnection(String),
}
