//! Per-request and per-stream pipeline state.

use http::{HeaderMap, Method, StatusCode};
use std::collections::HashMap;
use uuid::Uuid;

/// What kind of completion a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Open-ended chat completion.
    Chat,
    /// Fill-in-middle completion (prefix + suffix).
    FillInMiddle,
}

/// The tool family a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    /// Unrecognized client; default handling.
    Generic,
    /// GitHub Copilot (IDE plugin).
    Copilot,
    /// Cline / similar agentic CLI assistants.
    Cline,
}

/// A normalized request flowing through the input pipeline.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// HTTP method of the inner request.
    pub method: Method,
    /// Request path (no authority).
    pub path: String,
    /// Inbound headers.
    pub headers: HeaderMap,
    /// Body text (LLM payloads are JSON text).
    pub body: String,
    /// Completion style.
    pub kind: RequestKind,
    /// Originating tool family.
    pub client: ClientKind,
}

/// A direct response produced by a short-circuiting step; the request never
/// reaches any upstream.
#[derive(Debug, Clone)]
pub struct DirectResponse {
    /// HTTP status for the client-facing response.
    pub status: StatusCode,
    /// Content type of the body.
    pub content_type: String,
    /// Response body.
    pub body: String,
}

impl DirectResponse {
    /// A JSON direct response with status 200.
    pub fn json(body: String) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "application/json".to_string(),
            body,
        }
    }
}

/// Severity of a pipeline alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    /// Informational; surfaced in notifications and audit records.
    Info,
    /// Critical; a credential or PII item was stopped from leaking.
    Critical,
}

/// An alert raised by a pipeline step.
#[derive(Debug, Clone)]
pub struct Alert {
    /// Step that raised the alert.
    pub step: String,
    /// Severity.
    pub severity: AlertSeverity,
    /// Human-readable description (never contains the sensitive value).
    pub message: String,
}

/// A code snippet extracted from a request body.
#[derive(Debug, Clone)]
pub struct CodeSnippet {
    /// Language hint from the fence, if any.
    pub language: Option<String>,
    /// Filename the snippet refers to, if any.
    pub filename: Option<String>,
    /// The snippet text.
    pub code: String,
}

/// One context per request lifecycle; never shared across requests.
#[derive(Debug)]
pub struct PipelineContext {
    /// Code snippets extracted by steps.
    pub snippets: Vec<CodeSnippet>,
    /// Free-form metadata accumulated by steps.
    pub metadata: HashMap<String, String>,
    /// Handle to the session-scoped sensitive-data store.
    pub session: Uuid,
    /// Alerts raised by steps.
    pub alerts: Vec<Alert>,
    /// The recorded (fully redacted) input request body; set only after every
    /// input step ran.
    pub recorded_input: Option<String>,
    /// Output chunks as emitted to the client.
    pub recorded_output: Vec<String>,
    /// Processing ended early with a direct response.
    pub shortcut: bool,
}

impl PipelineContext {
    /// Create a context bound to a secrets session.
    pub fn new(session: Uuid) -> Self {
        Self {
            snippets: Vec::new(),
            metadata: HashMap::new(),
            session,
            alerts: Vec::new(),
            recorded_input: None,
            recorded_output: Vec::new(),
            shortcut: false,
        }
    }

    /// Raise an alert.
    pub fn alert(&mut self, step: &str, severity: AlertSeverity, message: impl Into<String>) {
        self.alerts.push(Alert {
            step: step.to_string(),
            severity,
            message: message.into(),
        });
    }

    /// Number of critical alerts raised so far.
    pub fn critical_alert_count(&self) -> usize {
        self.alerts
            .iter()
            .filter(|a| a.severity == AlertSeverity::Critical)
            .count()
    }
}

/// Per-response-stream state: the ordered text buffer holding content
/// withheld by a paused step.
#[derive(Debug, Default)]
pub struct OutputPipelineContext {
    buffer: Vec<String>,
}

impl OutputPipelineContext {
    /// Create an empty stream context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append withheld content to the buffer.
    pub fn push_buffered(&mut self, content: impl Into<String>) {
        self.buffer.push(content.into());
    }

    /// Drain the buffer into one string, preserving order.
    pub fn take_buffered(&mut self) -> String {
        let combined = self.buffer.concat();
        self.buffer.clear();
        combined
    }

    /// True when nothing is withheld.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_alert_counting() {
        let mut ctx = PipelineContext::new(Uuid::new_v4());
        ctx.alert("a", AlertSeverity::Info, "note");
        ctx.alert("b", AlertSeverity::Critical, "secret found");
        ctx.alert("b", AlertSeverity::Critical, "another");

        assert_eq!(ctx.alerts.len(), 3);
        assert_eq!(ctx.critical_alert_count(), 2);
    }

    #[test]
    fn test_output_context_buffer_order() {
        let mut out = OutputPipelineContext::new();
        assert!(out.is_empty());

        out.push_buffered("he");
        out.push_buffered("ll");
        out.push_buffered("o");

        assert_eq!(out.take_buffered(), "hello");
        assert!(out.is_empty());
        assert_eq!(out.take_buffered(), "");
    }
}
