//! Input step: credential redaction.

use crate::pipeline::{
    AlertSeverity, GatewayRequest, InputAction, InputStep, PipelineContext, PipelineError,
};
use crate::secrets::SecretsRedactor;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Replaces literal credentials in the request body with session-bound
/// markers before anything reaches an upstream.
pub struct SecretsRedactionStep {
    redactor: Arc<SecretsRedactor>,
}

impl SecretsRedactionStep {
    /// Create the step over a shared redactor.
    pub fn new(redactor: Arc<SecretsRedactor>) -> Self {
        Self { redactor }
    }
}

#[async_trait]
impl InputStep for SecretsRedactionStep {
    fn name(&self) -> &'static str {
        "secrets-redaction"
    }

    async fn process(
        &self,
        mut request: GatewayRequest,
        ctx: &mut PipelineContext,
    ) -> Result<InputAction, PipelineError> {
        let outcome = self.redactor.redact(ctx.session, &request.body)?;

        if !outcome.matches.is_empty() {
            debug!("Redacted {} credential(s) from request", outcome.matches.len());
            for m in &outcome.matches {
                // The alert must never carry the literal value.
                ctx.alert(
                    self.name(),
                    AlertSeverity::Critical,
                    format!("{}/{} credential redacted (line {})", m.service, m.kind, m.line),
                );
            }
            let prior: usize = ctx
                .metadata
                .get("secrets_redacted")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            ctx.metadata.insert(
                "secrets_redacted".to_string(),
                (prior + outcome.matches.len()).to_string(),
            );
            request.body = outcome.text;
        }

        Ok(InputAction::Continue(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ClientKind, RequestKind};
    use crate::secrets::{SessionStore, SignatureSet, MARKER_PREFIX};
    use http::Method;
    use std::time::Duration;

    fn step_and_store() -> (SecretsRedactionStep, Arc<SessionStore>) {
        let store = Arc::new(SessionStore::new(Duration::from_secs(60)));
        let redactor = Arc::new(SecretsRedactor::new(
            Arc::new(SignatureSet::builtin()),
            store.clone(),
        ));
        (SecretsRedactionStep::new(redactor), store)
    }

    fn request(body: String) -> GatewayRequest {
        GatewayRequest {
            method: Method::POST,
            path: "/v1/chat/completions".to_string(),
            headers: http::HeaderMap::new(),
            body,
            kind: RequestKind::Chat,
            client: ClientKind::Generic,
        }
    }

    #[tokio::test]
    async fn test_redacts_and_raises_alert() {
        let (step, store) = step_and_store();
        let session = store.create_session();
        let mut ctx = PipelineContext::new(session);

        let token = format!("ghp_{}", "z".repeat(36));
        let action = step
            .process(request(format!("use {token} here")), &mut ctx)
            .await
            .unwrap();

        match action {
            InputAction::Continue(req) => {
                assert!(!req.body.contains(&token));
                assert!(req.body.contains(MARKER_PREFIX));
            }
            InputAction::Shortcut(_) => panic!("must not shortcut"),
        }
        assert_eq!(ctx.critical_alert_count(), 1);
        assert_eq!(ctx.metadata.get("secrets_redacted").unwrap(), "1");
    }

    #[tokio::test]
    async fn test_clean_body_untouched() {
        let (step, store) = step_and_store();
        let session = store.create_session();
        let mut ctx = PipelineContext::new(session);

        let action = step
            .process(request("nothing secret".to_string()), &mut ctx)
            .await
            .unwrap();

        match action {
            InputAction::Continue(req) => assert_eq!(req.body, "nothing secret"),
            InputAction::Shortcut(_) => panic!("must not shortcut"),
        }
        assert!(ctx.alerts.is_empty());
    }
}
