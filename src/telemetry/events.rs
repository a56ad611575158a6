//! Audit event types for structured logging.
//!
//! These events are logged to syslog with the `MODELGATE` tag for SIEM
//! integration. Events never carry sensitive literals — counts and categories
//! only.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Audit events for security logging.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Gateway started.
    GatewayStart {
        /// Listen address.
        listen: String,
        /// Process ID.
        pid: u32,
    },

    /// Gateway stopped.
    GatewayStop {
        /// Uptime in seconds.
        uptime_sec: u64,
    },

    /// A request entered the inspection path.
    RequestIntercepted {
        /// Request path.
        path: String,
        /// Completion kind (chat / fill-in-middle).
        kind: String,
        /// Client family.
        client: String,
    },

    /// Sensitive values were redacted from a request.
    RedactionApplied {
        /// Number of credentials redacted.
        secrets: usize,
        /// Number of PII items redacted.
        pii: usize,
    },

    /// A local gateway command was answered without reaching any upstream.
    CommandIntercepted {
        /// The command line (never user content).
        command: String,
    },

    /// A muxing rule selected a destination.
    RouteSelected {
        /// Active workspace.
        workspace: String,
        /// Destination provider endpoint.
        provider: String,
        /// Destination model.
        model: String,
    },

    /// No muxing rule matched a mux-endpoint request.
    RouteMiss {
        /// Active workspace.
        workspace: String,
    },

    /// An upstream was unreachable or errored.
    UpstreamError {
        /// Description of the failure.
        message: String,
    },
}

/// Wrapper adding an ISO8601 timestamp during serialization.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}
