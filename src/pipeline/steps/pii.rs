//! PII analysis and reversible redaction.
//!
//! The analyzer is an explicitly constructed component owned by the
//! composition root and shared by reference; there is no ambient global
//! instance. PII values go through the same session marker machinery as
//! credentials, so the restoration step brings them back on egress.

use crate::pipeline::{
    AlertSeverity, GatewayRequest, InputAction, InputStep, PipelineContext, PipelineError,
};
use crate::secrets::SessionStore;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

/// A PII item found in scanned text.
#[derive(Debug, Clone)]
pub struct PiiMatch {
    /// Category (email, ssn, credit-card, phone, ipv4).
    pub kind: &'static str,
    /// The literal value.
    pub value: String,
    /// Absolute byte offset of the match start.
    pub start: usize,
    /// Absolute byte offset of the match end.
    pub end: usize,
}

/// Compiled PII patterns.
pub struct PiiAnalyzer {
    patterns: Vec<(&'static str, Regex)>,
}

impl PiiAnalyzer {
    /// Compile the analyzer's pattern set.
    pub fn new() -> Self {
        let patterns = vec![
            (
                "email",
                Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}").unwrap(),
            ),
            ("ssn", Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()),
            (
                "credit-card",
                Regex::new(r"\b(?:\d[ -]*?){13,16}\b").unwrap(),
            ),
            (
                "phone",
                Regex::new(r"\+\d{1,3}[-. ]\(?\d{2,4}\)?[-. ]\d{3,4}[-. ]\d{3,4}\b").unwrap(),
            ),
            (
                "ipv4",
                Regex::new(
                    r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
                )
                .unwrap(),
            ),
        ];
        Self { patterns }
    }

    /// Find PII in `text`, non-overlapping, in document order.
    pub fn scan(&self, text: &str) -> Vec<PiiMatch> {
        let mut hits: Vec<PiiMatch> = Vec::new();

        for (kind, regex) in &self.patterns {
            for m in regex.find_iter(text) {
                hits.push(PiiMatch {
                    kind: *kind,
                    value: m.as_str().to_string(),
                    start: m.start(),
                    end: m.end(),
                });
            }
        }

        hits.sort_by_key(|m| (m.start, m.end));
        let mut kept: Vec<PiiMatch> = Vec::new();
        for hit in hits {
            if kept.last().map_or(true, |prev| hit.start >= prev.end) {
                kept.push(hit);
            }
        }
        kept
    }
}

impl Default for PiiAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Input step replacing PII with session-bound markers.
pub struct PiiRedactionStep {
    analyzer: Arc<PiiAnalyzer>,
    store: Arc<SessionStore>,
}

impl PiiRedactionStep {
    /// Create the step over a shared analyzer and session store.
    pub fn new(analyzer: Arc<PiiAnalyzer>, store: Arc<SessionStore>) -> Self {
        Self { analyzer, store }
    }
}

#[async_trait]
impl InputStep for PiiRedactionStep {
    fn name(&self) -> &'static str {
        "pii-redaction"
    }

    async fn process(
        &self,
        mut request: GatewayRequest,
        ctx: &mut PipelineContext,
    ) -> Result<InputAction, PipelineError> {
        let hits = self.analyzer.scan(&request.body);
        if hits.is_empty() {
            return Ok(InputAction::Continue(request));
        }

        debug!("Redacting {} PII item(s) from request", hits.len());

        let mut body = request.body.clone();
        for hit in hits.iter().rev() {
            let opaque_id = self
                .store
                .encrypt(ctx.session, &hit.value, "pii", hit.kind)?;
            body.replace_range(hit.start..hit.end, &format!("REDACTED<${opaque_id}>"));
        }

        for hit in &hits {
            ctx.alert(
                self.name(),
                AlertSeverity::Critical,
                format!("{} redacted", hit.kind),
            );
        }
        ctx.metadata
            .insert("pii_redacted".to_string(), hits.len().to_string());

        request.body = body;
        Ok(InputAction::Continue(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ClientKind, RequestKind};
    use http::Method;
    use std::time::Duration;

    fn request(body: &str) -> GatewayRequest {
        GatewayRequest {
            method: Method::POST,
            path: "/v1/chat/completions".to_string(),
            headers: http::HeaderMap::new(),
            body: body.to_string(),
            kind: RequestKind::Chat,
            client: ClientKind::Generic,
        }
    }

    #[test]
    fn test_analyzer_finds_email_and_ssn() {
        let analyzer = PiiAnalyzer::new();
        let hits = analyzer.scan("mail john.doe@example.com ssn 123-45-6789");

        let kinds: Vec<&str> = hits.iter().map(|h| h.kind).collect();
        assert!(kinds.contains(&"email"));
        assert!(kinds.contains(&"ssn"));
    }

    #[test]
    fn test_analyzer_overlaps_deduped() {
        let analyzer = PiiAnalyzer::new();
        let hits = analyzer.scan("card 4111-1111-1111-1111 end");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_analyzer_clean_text() {
        let analyzer = PiiAnalyzer::new();
        assert!(analyzer.scan("just some plain words").is_empty());
    }

    #[tokio::test]
    async fn test_pii_redaction_round_trip() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(60)));
        let step = PiiRedactionStep::new(Arc::new(PiiAnalyzer::new()), store.clone());

        let session = store.create_session();
        let mut ctx = PipelineContext::new(session);

        let action = step
            .process(request("contact admin@corp.example please"), &mut ctx)
            .await
            .unwrap();

        let body = match action {
            InputAction::Continue(req) => req.body,
            InputAction::Shortcut(_) => panic!("must not shortcut"),
        };
        assert!(!body.contains("admin@corp.example"));
        assert!(body.contains("REDACTED<$"));
        assert_eq!(ctx.critical_alert_count(), 1);

        // The recorded secret restores through the same session.
        let records = store.secrets_for(session);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].plaintext, "admin@corp.example");
        assert_eq!(records[0].service, "pii");
    }
}
