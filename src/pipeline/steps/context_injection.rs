//! Input step: workspace context injection.

use crate::pipeline::{
    GatewayRequest, InputAction, InputStep, PipelineContext, PipelineError, RequestKind,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::trace;

/// Prepends the workspace's custom instructions as a system message on chat
/// requests.
///
/// Fill-in-middle payloads and bodies that are not a chat-message object pass
/// through untouched; a request that already carries a system message is not
/// injected twice.
pub struct ContextInjectionStep {
    instructions: String,
}

impl ContextInjectionStep {
    /// Create the step with the instructions to inject.
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
        }
    }
}

#[async_trait]
impl InputStep for ContextInjectionStep {
    fn name(&self) -> &'static str {
        "context-injection"
    }

    async fn process(
        &self,
        mut request: GatewayRequest,
        ctx: &mut PipelineContext,
    ) -> Result<InputAction, PipelineError> {
        if request.kind != RequestKind::Chat || self.instructions.is_empty() {
            return Ok(InputAction::Continue(request));
        }

        let Ok(mut body) = serde_json::from_str::<Value>(&request.body) else {
            trace!("Body is not JSON; skipping context injection");
            return Ok(InputAction::Continue(request));
        };

        let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
            return Ok(InputAction::Continue(request));
        };

        let has_system = messages
            .iter()
            .any(|m| m.get("role").and_then(Value::as_str) == Some("system"));
        if !has_system {
            messages.insert(
                0,
                json!({"role": "system", "content": self.instructions}),
            );
            ctx.metadata
                .insert("context_injected".to_string(), "true".to_string());
            request.body = body.to_string();
        }

        Ok(InputAction::Continue(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ClientKind;
    use http::Method;
    use uuid::Uuid;

    fn request(body: &str, kind: RequestKind) -> GatewayRequest {
        GatewayRequest {
            method: Method::POST,
            path: "/v1/chat/completions".to_string(),
            headers: http::HeaderMap::new(),
            body: body.to_string(),
            kind,
            client: ClientKind::Generic,
        }
    }

    async fn run(step: &ContextInjectionStep, req: GatewayRequest) -> String {
        let mut ctx = PipelineContext::new(Uuid::new_v4());
        match step.process(req, &mut ctx).await.unwrap() {
            InputAction::Continue(req) => req.body,
            InputAction::Shortcut(_) => panic!("must not shortcut"),
        }
    }

    #[tokio::test]
    async fn test_injects_system_message() {
        let step = ContextInjectionStep::new("always use tabs");
        let body = r#"{"messages":[{"role":"user","content":"hi"}]}"#;

        let out = run(&step, request(body, RequestKind::Chat)).await;
        let parsed: Value = serde_json::from_str(&out).unwrap();
        let messages = parsed["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "always use tabs");
    }

    #[tokio::test]
    async fn test_existing_system_message_not_duplicated() {
        let step = ContextInjectionStep::new("instructions");
        let body = r#"{"messages":[{"role":"system","content":"keep"},{"role":"user","content":"hi"}]}"#;

        let out = run(&step, request(body, RequestKind::Chat)).await;
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["messages"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fim_request_untouched() {
        let step = ContextInjectionStep::new("instructions");
        let body = r#"{"prompt":"a","suffix":"b"}"#;

        let out = run(&step, request(body, RequestKind::FillInMiddle)).await;
        assert_eq!(out, body);
    }

    #[tokio::test]
    async fn test_non_json_body_untouched() {
        let step = ContextInjectionStep::new("instructions");
        let out = run(&step, request("plain text", RequestKind::Chat)).await;
        assert_eq!(out, "plain text");
    }
}
