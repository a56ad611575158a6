//! External collaborator interfaces.
//!
//! The gateway core consumes three capabilities it does not own:
//!
//! - [`ProviderRegistry`]: the catalog of upstream provider endpoints, with
//!   model listing and request execution per provider kind
//! - [`SnippetExtractor`]: per-client-type extraction of code snippets and
//!   referenced filenames from request bodies (feeds the muxing matcher)
//! - [`AuditStore`]: insert-only persistence of request/alert records
//!
//! Shipped implementations ([`StaticProviderRegistry`], the default
//! extractors, [`NullAuditStore`]/[`MemoryAuditStore`]) are enough for the
//! composition root and tests; richer backends plug in behind the same
//! traits.

use crate::mux::ModelRoute;
use crate::pipeline::{Alert, ClientKind, CodeSnippet, GatewayRequest, RequestKind};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::combinators::BoxBody;
use hyper::Response;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use uuid::Uuid;

/// Errors from collaborator implementations.
#[derive(Debug, Error)]
pub enum CollabError {
    /// A provider base URL could not be parsed.
    #[error("Invalid provider base URL '{0}'")]
    InvalidBaseUrl(String),

    /// The upstream provider was unreachable or errored.
    #[error("Upstream provider error: {0}")]
    Upstream(String),
}

/// Kind of upstream provider endpoint.
///
/// A closed set: dispatch over provider kinds is an exhaustive `match`, not a
/// string-keyed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible chat/completions API.
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// Local Ollama daemon.
    Ollama,
    /// vLLM serving an OpenAI-compatible API.
    Vllm,
}

/// One configured upstream provider endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    /// Unique endpoint name.
    pub name: String,
    /// Provider kind.
    pub kind: ProviderKind,
    /// Base URL (scheme + authority + optional path prefix).
    pub base_url: String,
    /// Environment variable holding the API key, if any.
    pub api_key_env: Option<String>,
}

/// Catalog of provider endpoints: model listing plus request execution.
#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    /// All configured endpoints (deep copy).
    fn endpoints(&self) -> Vec<ProviderEndpoint>;

    /// Look up one endpoint by name.
    fn endpoint(&self, name: &str) -> Option<ProviderEndpoint>;

    /// Models known at an endpoint.
    fn models(&self, name: &str) -> Vec<String>;

    /// Does the endpoint exist and serve this model?
    fn has_model(&self, name: &str, model: &str) -> bool;

    /// Execute a request against the routed provider.
    ///
    /// The implementation rewrites the payload's model to the route's model
    /// and injects auth material; it does not translate between vendor API
    /// formats.
    async fn execute(
        &self,
        route: &ModelRoute,
        request: GatewayRequest,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, CollabError>;
}

/// Provider registry backed by static configuration.
pub struct StaticProviderRegistry {
    endpoints: HashMap<String, (ProviderEndpoint, Vec<String>)>,
}

impl StaticProviderRegistry {
    /// Build the registry from configured endpoints and their model lists.
    pub fn new(entries: Vec<(ProviderEndpoint, Vec<String>)>) -> Self {
        let endpoints = entries
            .into_iter()
            .map(|(ep, models)| (ep.name.clone(), (ep, models)))
            .collect();
        Self { endpoints }
    }
}

#[async_trait]
impl ProviderRegistry for StaticProviderRegistry {
    fn endpoints(&self) -> Vec<ProviderEndpoint> {
        self.endpoints.values().map(|(ep, _)| ep.clone()).collect()
    }

    fn endpoint(&self, name: &str) -> Option<ProviderEndpoint> {
        self.endpoints.get(name).map(|(ep, _)| ep.clone())
    }

    fn models(&self, name: &str) -> Vec<String> {
        self.endpoints
            .get(name)
            .map(|(_, models)| models.clone())
            .unwrap_or_default()
    }

    fn has_model(&self, name: &str, model: &str) -> bool {
        self.endpoints
            .get(name)
            .is_some_and(|(_, models)| models.iter().any(|m| m == model))
    }

    async fn execute(
        &self,
        route: &ModelRoute,
        request: GatewayRequest,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, CollabError> {
        crate::proxy::client::execute_route(route, request)
            .await
            .map_err(|e| CollabError::Upstream(e.to_string()))
    }
}

/// Per-client-type extraction of snippets and referenced filenames.
pub trait SnippetExtractor: Send + Sync {
    /// Filenames referenced by the request body.
    fn filenames(&self, body: &str) -> Vec<String>;

    /// Code snippets present in the request body.
    fn snippets(&self, body: &str) -> Vec<CodeSnippet>;
}

static FENCE_REGEX: OnceLock<Regex> = OnceLock::new();
static FILE_TOKEN_REGEX: OnceLock<Regex> = OnceLock::new();
static PATH_COMMENT_REGEX: OnceLock<Regex> = OnceLock::new();

fn fence_regex() -> &'static Regex {
    FENCE_REGEX.get_or_init(|| Regex::new(r"(?s)```([^\n`]*)\n(.*?)```").unwrap())
}

fn file_token_regex() -> &'static Regex {
    FILE_TOKEN_REGEX.get_or_init(|| {
        Regex::new(
            r"\b[\w./\-]+\.(?:rs|py|ts|tsx|js|jsx|go|java|rb|kt|c|cc|cpp|h|hpp|cs|md|toml|yaml|yml|json)\b",
        )
        .unwrap()
    })
}

fn path_comment_regex() -> &'static Regex {
    PATH_COMMENT_REGEX.get_or_init(|| Regex::new(r"(?m)^\s*(?://|#)\s*Path:\s*(\S+)").unwrap())
}

/// Extractor for generic chat clients: markdown fences and filename-like
/// tokens.
pub struct DefaultSnippetExtractor;

impl SnippetExtractor for DefaultSnippetExtractor {
    fn filenames(&self, body: &str) -> Vec<String> {
        let mut names: Vec<String> = file_token_regex()
            .find_iter(body)
            .map(|m| m.as_str().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn snippets(&self, body: &str) -> Vec<CodeSnippet> {
        fence_regex()
            .captures_iter(body)
            .map(|caps| {
                let info = caps[1].trim();
                let mut language = None;
                let mut filename = None;
                for token in info.split_whitespace() {
                    if token.contains('.') {
                        filename = Some(token.to_string());
                    } else if language.is_none() && !token.is_empty() {
                        language = Some(token.to_string());
                    }
                }
                CodeSnippet {
                    language,
                    filename,
                    code: caps[2].to_string(),
                }
            })
            .collect()
    }
}

/// Extractor for Copilot-style fill-in-middle payloads, which reference the
/// edited file in `// Path: ...` header comments.
pub struct CopilotSnippetExtractor;

impl SnippetExtractor for CopilotSnippetExtractor {
    fn filenames(&self, body: &str) -> Vec<String> {
        let mut names: Vec<String> = path_comment_regex()
            .captures_iter(body)
            .map(|caps| caps[1].to_string())
            .collect();
        if names.is_empty() {
            // Fall back to generic token extraction.
            names = DefaultSnippetExtractor.filenames(body);
        }
        names.sort();
        names.dedup();
        names
    }

    fn snippets(&self, body: &str) -> Vec<CodeSnippet> {
        DefaultSnippetExtractor.snippets(body)
    }
}

/// The extractor appropriate for a client family.
pub fn extractor_for(client: ClientKind) -> Arc<dyn SnippetExtractor> {
    match client {
        ClientKind::Copilot => Arc::new(CopilotSnippetExtractor),
        ClientKind::Cline | ClientKind::Generic => Arc::new(DefaultSnippetExtractor),
    }
}

/// An audited request: the recorded (redacted) input plus what was emitted.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// Unique record id.
    pub id: Uuid,
    /// When the request was processed.
    pub timestamp: DateTime<Utc>,
    /// Request path.
    pub path: String,
    /// Completion kind.
    pub kind: RequestKind,
    /// Originating client family.
    pub client: ClientKind,
    /// The recorded input body; all redactions applied, never plaintext
    /// secrets.
    pub redacted_body: String,
    /// Alerts raised during processing.
    pub alerts: Vec<Alert>,
    /// Output chunks as emitted to the client.
    pub output: Vec<String>,
}

/// Insert-only persistence for request records.
pub trait AuditStore: Send + Sync {
    /// Persist one record.
    fn record_request(&self, record: RequestRecord);
}

/// Discards all records (tests, or auditing disabled).
pub struct NullAuditStore;

impl AuditStore for NullAuditStore {
    fn record_request(&self, _record: RequestRecord) {}
}

/// Keeps records in memory; the query side used by tests.
#[derive(Default)]
pub struct MemoryAuditStore {
    records: Mutex<Vec<RequestRecord>>,
}

impl MemoryAuditStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All records so far (deep copy).
    pub fn records(&self) -> Vec<RequestRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl AuditStore for MemoryAuditStore {
    fn record_request(&self, record: RequestRecord) {
        self.records.lock().unwrap().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(name: &str) -> ProviderEndpoint {
        ProviderEndpoint {
            name: name.to_string(),
            kind: ProviderKind::OpenAi,
            base_url: "https://llm.internal/v1".to_string(),
            api_key_env: None,
        }
    }

    #[test]
    fn test_static_registry_lookup() {
        let registry = StaticProviderRegistry::new(vec![(
            endpoint("main"),
            vec!["gpt-4o".to_string()],
        )]);

        assert!(registry.endpoint("main").is_some());
        assert!(registry.endpoint("ghost").is_none());
        assert!(registry.has_model("main", "gpt-4o"));
        assert!(!registry.has_model("main", "deleted"));
        assert!(!registry.has_model("ghost", "gpt-4o"));
        assert_eq!(registry.models("main"), vec!["gpt-4o"]);
    }

    #[test]
    fn test_default_extractor_filenames() {
        let body = "please fix src/main.rs and also look at lib/util.py, thanks";
        let names = DefaultSnippetExtractor.filenames(body);
        assert_eq!(names, vec!["lib/util.py", "src/main.rs"]);
    }

    #[test]
    fn test_default_extractor_snippets() {
        let body = "intro\n```rust main.rs\nfn main() {}\n```\ntail";
        let snippets = DefaultSnippetExtractor.snippets(body);

        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].language.as_deref(), Some("rust"));
        assert_eq!(snippets[0].filename.as_deref(), Some("main.rs"));
        assert!(snippets[0].code.contains("fn main"));
    }

    #[test]
    fn test_copilot_extractor_path_comments() {
        let body = "{\"prompt\":\"// Path: src/editor.ts\\nfunction x() {\"}";
        // The JSON-escaped newline is literal here; use a raw prompt instead.
        let raw = "// Path: src/editor.ts\nfunction x() {";
        let names = CopilotSnippetExtractor.filenames(raw);
        assert_eq!(names, vec!["src/editor.ts"]);
        assert!(!CopilotSnippetExtractor.filenames(body).is_empty());
    }

    #[test]
    fn test_extractor_dispatch_is_exhaustive() {
        for client in [ClientKind::Generic, ClientKind::Copilot, ClientKind::Cline] {
            let extractor = extractor_for(client);
            let _ = extractor.filenames("x.rs");
        }
    }

    #[test]
    fn test_memory_audit_store() {
        let store = MemoryAuditStore::new();
        store.record_request(RequestRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            path: "/v1/chat/completions".to_string(),
            kind: RequestKind::Chat,
            client: ClientKind::Generic,
            redacted_body: "REDACTED<$abc>".to_string(),
            alerts: Vec::new(),
            output: vec!["ok".to_string()],
        });

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].redacted_body.contains("REDACTED"));
    }
}
