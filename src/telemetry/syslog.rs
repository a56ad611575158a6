//! Syslog integration for audit logging.
//!
//! All audit events go to syslog with the `MODELGATE` tag, never to
//! stdout/stderr; `tracing` handles debug logging separately.

use std::sync::Mutex;

use syslog::{Facility, Formatter3164};
use tracing::{debug, error};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "MODELGATE";

/// Audit logger writing structured JSON events to syslog.
///
/// Interior mutability (Mutex) lets shared references log; the logger is
/// handed around as an `Arc` by the composition root.
pub struct AuditLogger {
    /// Syslog writer; `None` is the null logger used in tests.
    writer: Option<Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>>,
}

impl AuditLogger {
    /// Connect to the local syslog daemon.
    ///
    /// # Errors
    ///
    /// Fails when no syslog socket is reachable.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer = syslog::unix(formatter)
            .map_err(|e| TelemetryError::SyslogConnection(e.to_string()))?;

        debug!("Connected to syslog with tag '{SYSLOG_TAG}'");
        Ok(Self {
            writer: Some(Mutex::new(writer)),
        })
    }

    /// A logger that discards every event (tests, or syslog unavailable).
    pub fn new_null() -> Self {
        Self { writer: None }
    }

    /// Log one audit event as timestamped JSON.
    pub fn log(&self, event: AuditEvent) {
        let Some(ref writer) = self.writer else {
            return;
        };

        match serde_json::to_string(&event.with_timestamp()) {
            Ok(json) => match writer.lock() {
                Ok(mut writer) => {
                    if let Err(e) = writer.info(&json) {
                        error!("Failed to write to syslog: {e}");
                    }
                }
                Err(e) => error!("Failed to acquire syslog writer lock: {e}"),
            },
            Err(e) => error!("Failed to serialize audit event: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_logger_discards() {
        let logger = AuditLogger::new_null();
        // Must not panic or block.
        logger.log(AuditEvent::RouteMiss {
            workspace: "default".to_string(),
        });
    }
}
