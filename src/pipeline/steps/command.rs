//! Input step: local command interception.
//!
//! Chat messages addressed to the gateway itself (`modelgate ...`) are
//! answered directly with a synthesized chat completion; the request never
//! reaches any upstream provider.

use crate::mux::RuleRegistry;
use crate::pipeline::{
    AlertSeverity, DirectResponse, GatewayRequest, InputAction, InputStep, PipelineContext,
    PipelineError, RequestKind,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Command word that addresses the gateway.
const COMMAND_WORD: &str = "modelgate";

/// Intercepts `modelgate version` / `modelgate workspace ...` commands.
pub struct CommandInterceptionStep {
    registry: Arc<RuleRegistry>,
}

impl CommandInterceptionStep {
    /// Create the step over the shared rule registry.
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self { registry }
    }

    /// Execute a parsed command line, returning the reply text.
    fn execute(&self, args: &[&str]) -> String {
        match args {
            ["version"] => format!("modelgate {}", env!("CARGO_PKG_VERSION")),
            ["workspace", "list"] => {
                let active = self.registry.active_workspace();
                let mut lines: Vec<String> = self
                    .registry
                    .workspace_names()
                    .into_iter()
                    .map(|name| {
                        if name == active {
                            format!("* {name} (active)")
                        } else {
                            format!("  {name}")
                        }
                    })
                    .collect();
                lines.sort();
                lines.join("\n")
            }
            ["workspace", "activate", name] => match self.registry.set_active(name) {
                Ok(()) => format!("Workspace '{name}' is now active"),
                Err(e) => format!("Cannot activate workspace: {e}"),
            },
            _ => concat!(
                "Usage:\n",
                "  modelgate version\n",
                "  modelgate workspace list\n",
                "  modelgate workspace activate <name>",
            )
            .to_string(),
        }
    }
}

#[async_trait]
impl InputStep for CommandInterceptionStep {
    fn name(&self) -> &'static str {
        "command-interception"
    }

    async fn process(
        &self,
        request: GatewayRequest,
        ctx: &mut PipelineContext,
    ) -> Result<InputAction, PipelineError> {
        if request.kind != RequestKind::Chat {
            return Ok(InputAction::Continue(request));
        }

        let Some(text) = last_user_message(&request.body) else {
            return Ok(InputAction::Continue(request));
        };

        let trimmed = text.trim();
        if trimmed != COMMAND_WORD && !trimmed.starts_with(&format!("{COMMAND_WORD} ")) {
            return Ok(InputAction::Continue(request));
        }

        let args: Vec<&str> = trimmed
            .strip_prefix(COMMAND_WORD)
            .unwrap_or("")
            .split_whitespace()
            .collect();

        debug!("Intercepted local command: {:?}", args);
        ctx.alert(
            self.name(),
            AlertSeverity::Info,
            format!("local command handled: {}", args.join(" ")),
        );
        ctx.metadata
            .insert("command".to_string(), args.join(" "));

        let reply = self.execute(&args);
        Ok(InputAction::Shortcut(DirectResponse::json(
            completion_reply(&reply).to_string(),
        )))
    }
}

/// Extract the text of the last user message from a chat payload.
fn last_user_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let messages = parsed.get("messages")?.as_array()?;

    let message = messages
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))?;

    match message.get("content")? {
        Value::String(s) => Some(s.clone()),
        // Content blocks: concatenate the text parts.
        Value::Array(parts) => Some(
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}

/// A minimal chat-completion object carrying the command reply.
fn completion_reply(content: &str) -> Value {
    json!({
        "id": "modelgate-local",
        "object": "chat.completion",
        "model": "modelgate",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}
