//! Request classification and pipeline selection.
//!
//! The selection step decides which input/output pipeline a request gets,
//! based on its completion kind (chat vs fill-in-middle) and the originating
//! client. Classification is heuristic but cheap: path shape, body fields and
//! the user-agent header.

use super::{ClientKind, InputPipeline, OutputPipeline, RequestKind};
use http::HeaderMap;
use std::sync::Arc;

/// Picks the pipeline pair appropriate to a request.
pub struct PipelineSelector {
    chat_input: Arc<InputPipeline>,
    fim_input: Arc<InputPipeline>,
    chat_output: Arc<OutputPipeline>,
    fim_output: Arc<OutputPipeline>,
}

impl PipelineSelector {
    /// Build a selector from the four configured pipelines.
    pub fn new(
        chat_input: Arc<InputPipeline>,
        fim_input: Arc<InputPipeline>,
        chat_output: Arc<OutputPipeline>,
        fim_output: Arc<OutputPipeline>,
    ) -> Self {
        Self {
            chat_input,
            fim_input,
            chat_output,
            fim_output,
        }
    }

    /// Input pipeline for a request kind.
    pub fn input_for(&self, kind: RequestKind) -> Arc<InputPipeline> {
        match kind {
            RequestKind::Chat => self.chat_input.clone(),
            RequestKind::FillInMiddle => self.fim_input.clone(),
        }
    }

    /// Output pipeline for a request kind.
    pub fn output_for(&self, kind: RequestKind) -> Arc<OutputPipeline> {
        match kind {
            RequestKind::Chat => self.chat_output.clone(),
            RequestKind::FillInMiddle => self.fim_output.clone(),
        }
    }
}

/// Classify a request into (kind, client).
pub fn classify(path: &str, headers: &HeaderMap, body: &str) -> (RequestKind, ClientKind) {
    (detect_kind(path, body), detect_client(headers))
}

/// Completion kind from the path and body shape.
///
/// Fill-in-middle requests either hit a completions endpoint with both
/// `prompt` and `suffix`, or an explicit FIM path segment. Everything else is
/// chat.
pub fn detect_kind(path: &str, body: &str) -> RequestKind {
    // The path may still carry a query string.
    let path = path.split('?').next().unwrap_or(path);

    if path.contains("/fim") {
        return RequestKind::FillInMiddle;
    }
    if path.ends_with("/completions") && !path.ends_with("/chat/completions") {
        let has_prompt = body.contains("\"prompt\"");
        let has_suffix = body.contains("\"suffix\"");
        if has_prompt && has_suffix {
            return RequestKind::FillInMiddle;
        }
    }
    RequestKind::Chat
}

/// Client family from the user-agent header.
pub fn detect_client(headers: &HeaderMap) -> ClientKind {
    let agent = headers
        .get(http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();

    if agent.contains("copilot") {
        ClientKind::Copilot
    } else if agent.contains("cline") {
        ClientKind::Cline
    } else {
        ClientKind::Generic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::USER_AGENT;

    #[test]
    fn test_detect_kind_chat_default() {
        assert_eq!(
            detect_kind("/v1/chat/completions", "{\"messages\":[]}"),
            RequestKind::Chat
        );
    }

    #[test]
    fn test_detect_kind_fim_by_body() {
        let body = r#"{"prompt":"fn main() {","suffix":"}"}"#;
        assert_eq!(detect_kind("/v1/completions", body), RequestKind::FillInMiddle);
        // No suffix: plain completion treated as chat-style.
        assert_eq!(
            detect_kind("/v1/completions", r#"{"prompt":"hello"}"#),
            RequestKind::Chat
        );
    }

    #[test]
    fn test_detect_kind_fim_by_path() {
        assert_eq!(
            detect_kind("/v1/fim/completions", "{}"),
            RequestKind::FillInMiddle
        );
    }

    #[test]
    fn test_detect_client() {
        let mut headers = HeaderMap::new();
        assert_eq!(detect_client(&headers), ClientKind::Generic);

        headers.insert(USER_AGENT, "GithubCopilot/1.155.0".parse().unwrap());
        assert_eq!(detect_client(&headers), ClientKind::Copilot);

        headers.insert(USER_AGENT, "Cline/3.2".parse().unwrap());
        assert_eq!(detect_client(&headers), ClientKind::Cline);
    }

    #[test]
    fn test_selector_routes_by_kind() {
        let chat_input = Arc::new(InputPipeline::default());
        let fim_input = Arc::new(InputPipeline::default());
        let chat_output = Arc::new(OutputPipeline::default());
        let fim_output = Arc::new(OutputPipeline::default());

        let selector = PipelineSelector::new(
            chat_input.clone(),
            fim_input.clone(),
            chat_output,
            fim_output,
        );

        assert!(Arc::ptr_eq(
            &selector.input_for(RequestKind::Chat),
            &chat_input
        ));
        assert!(Arc::ptr_eq(
            &selector.input_for(RequestKind::FillInMiddle),
            &fim_input
        ));
    }
}
