//! Telemetry and audit logging.
//!
//! Two separate concerns:
//!
//! - **Audit logging** (syslog): security events as JSON with the `MODELGATE`
//!   tag, for SIEM integration. Never touches stdout/stderr.
//! - **Debug logging** (`tracing`): development logs to stderr.
//!
//! The [`AuditLogger`] is constructed once by the composition root and shared
//! by reference; there is no global instance.
//!
//! # Event format
//!
//! ```json
//! {"ts":"2026-08-07T14:32:01Z","event":"redaction_applied","secrets":2,"pii":0}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::{AuditEvent, TimestampedEvent};
pub use syslog::{AuditLogger, SYSLOG_TAG};
