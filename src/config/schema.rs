//! Configuration schema definitions.
//!
//! Configuration is TOML, loaded from multiple sources and merged in order:
//!
//! 1. System config: `/etc/modelgate/config.toml`
//! 2. User config: `~/.config/modelgate/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! Lists (routes, providers, workspaces) are merged by key; scalars are
//! overridden when non-default.

use crate::mux::{ModelRoute, MuxRule, RuleMatcher};
use crate::pipeline::RequestKind;
use crate::proxy::RouteEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::error::ConfigError;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Core gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Pipeline toggles.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Path→target relay table.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Upstream provider endpoints.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Workspaces with their mux rules.
    #[serde(default)]
    pub workspaces: Vec<WorkspaceConfig>,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Scalars are overridden when non-default; routes/providers/workspaces
    /// are merged by key (path/name), later sources replacing earlier
    /// entries.
    pub fn merge(&mut self, other: Config) {
        self.gateway.merge(other.gateway);
        self.pipeline.merge(other.pipeline);

        for route in other.routes {
            if let Some(existing) = self.routes.iter_mut().find(|r| r.path == route.path) {
                *existing = route;
            } else {
                self.routes.push(route);
            }
        }
        for provider in other.providers {
            if let Some(existing) = self
                .providers
                .iter_mut()
                .find(|p| p.name == provider.name)
            {
                *existing = provider;
            } else {
                self.providers.push(provider);
            }
        }
        for workspace in other.workspaces {
            if let Some(existing) = self
                .workspaces
                .iter_mut()
                .find(|w| w.name == workspace.name)
            {
                *existing = workspace;
            } else {
                self.workspaces.push(workspace);
            }
        }
    }

    /// The relay table entries.
    pub fn route_entries(&self) -> Vec<RouteEntry> {
        self.routes
            .iter()
            .map(|r| RouteEntry {
                path: r.path.clone(),
                target: r.target.clone(),
                extra_headers: r.headers.clone().into_iter().collect(),
            })
            .collect()
    }

    /// Compile each workspace's rules into domain form.
    ///
    /// # Errors
    ///
    /// Fails on invalid glob patterns or unknown matcher/kind names.
    pub fn compiled_workspaces(&self) -> Result<Vec<(String, Vec<MuxRule>)>, ConfigError> {
        self.workspaces
            .iter()
            .map(|ws| {
                let rules = ws
                    .rules
                    .iter()
                    .map(|rule| rule.compile(&self.providers, &ws.name))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((ws.name.clone(), rules))
            })
            .collect()
    }
}

/// Core gateway settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Listen address (host:port).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Directory for CA and domain certificate PEMs.
    #[serde(default)]
    pub cert_dir: Option<PathBuf>,

    /// Domain on the gateway's own server certificate.
    #[serde(default = "default_server_domain")]
    pub server_domain: String,

    /// Inbound body cap in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Secrets session key lifetime in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Path to the credential signature rule file.
    #[serde(default)]
    pub signatures_path: Option<PathBuf>,
}

fn default_listen() -> String {
    "127.0.0.1:8989".to_string()
}

fn default_server_domain() -> String {
    "localhost".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_session_ttl() -> u64 {
    300
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            cert_dir: None,
            server_domain: default_server_domain(),
            max_body_bytes: default_max_body_bytes(),
            session_ttl_secs: default_session_ttl(),
            signatures_path: None,
        }
    }
}

impl GatewayConfig {
    fn merge(&mut self, other: GatewayConfig) {
        if other.listen != default_listen() {
            self.listen = other.listen;
        }
        if other.cert_dir.is_some() {
            self.cert_dir = other.cert_dir;
        }
        if other.server_domain != default_server_domain() {
            self.server_domain = other.server_domain;
        }
        if other.max_body_bytes != default_max_body_bytes() {
            self.max_body_bytes = other.max_body_bytes;
        }
        if other.session_ttl_secs != default_session_ttl() {
            self.session_ttl_secs = other.session_ttl_secs;
        }
        if other.signatures_path.is_some() {
            self.signatures_path = other.signatures_path;
        }
    }
}

/// Pipeline toggles.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Custom instructions injected as a system message on chat requests.
    #[serde(default)]
    pub custom_instructions: String,

    /// Append a notice chunk when redactions happened.
    #[serde(default = "default_true")]
    pub notify_redactions: bool,

    /// Answer `modelgate ...` chat commands locally.
    #[serde(default = "default_true")]
    pub intercept_commands: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            custom_instructions: String::new(),
            notify_redactions: true,
            intercept_commands: true,
        }
    }
}

impl PipelineConfig {
    fn merge(&mut self, other: PipelineConfig) {
        if !other.custom_instructions.is_empty() {
            self.custom_instructions = other.custom_instructions;
        }
        self.notify_redactions = other.notify_redactions;
        self.intercept_commands = other.intercept_commands;
    }
}

/// One relay-table entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Inbound path (exact or prefix).
    pub path: String,
    /// Target base URL.
    pub target: String,
    /// Endpoint-specific headers injected on forward.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// One provider endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Unique endpoint name.
    pub name: String,
    /// Provider kind.
    pub kind: crate::collab::ProviderKind,
    /// Base URL.
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Models served at this endpoint.
    #[serde(default)]
    pub models: Vec<String>,
}

/// A workspace with its ordered mux rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkspaceConfig {
    /// Workspace name.
    pub name: String,
    /// Activate this workspace at startup.
    #[serde(default)]
    pub active: bool,
    /// Mux rules.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// Matcher kind names accepted in rule configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKindConfig {
    /// Always matches.
    CatchAll,
    /// Filename glob.
    FilenameMatch,
    /// Filename glob restricted to fill-in-middle requests.
    FimFilenameMatch,
    /// Filename glob restricted to chat requests.
    ChatFilenameMatch,
}

/// One mux rule in config form.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleConfig {
    /// Matcher kind.
    pub matcher: MatcherKindConfig,
    /// Glob pattern (ignored for catch_all).
    #[serde(default)]
    pub pattern: String,
    /// Ascending priority.
    pub priority: u32,
    /// Destination provider endpoint name.
    pub provider: String,
    /// Destination model.
    pub model: String,
}

impl RuleConfig {
    /// Compile into a domain rule, resolving the destination's base URL and
    /// auth from the provider list.
    fn compile(
        &self,
        providers: &[ProviderConfig],
        workspace: &str,
    ) -> Result<MuxRule, ConfigError> {
        let matcher = match self.matcher {
            MatcherKindConfig::CatchAll => RuleMatcher::catch_all(),
            MatcherKindConfig::FilenameMatch => RuleMatcher::filename_glob(&self.pattern)
                .map_err(|source| ConfigError::InvalidRule {
                    workspace: workspace.to_string(),
                    source,
                })?,
            MatcherKindConfig::FimFilenameMatch => {
                RuleMatcher::request_type_glob(RequestKind::FillInMiddle, &self.pattern).map_err(
                    |source| ConfigError::InvalidRule {
                        workspace: workspace.to_string(),
                        source,
                    },
                )?
            }
            MatcherKindConfig::ChatFilenameMatch => {
                RuleMatcher::request_type_glob(RequestKind::Chat, &self.pattern).map_err(
                    |source| ConfigError::InvalidRule {
                        workspace: workspace.to_string(),
                        source,
                    },
                )?
            }
        };

        let endpoint = providers.iter().find(|p| p.name == self.provider);

        Ok(MuxRule {
            matcher,
            priority: self.priority,
            route: ModelRoute {
                provider: self.provider.clone(),
                model: self.model.clone(),
                base_url: endpoint.map(|e| e.base_url.clone()).unwrap_or_default(),
                api_key_env: endpoint.and_then(|e| e.api_key_env.clone()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.listen, "127.0.0.1:8989");
        assert_eq!(config.gateway.max_body_bytes, 10 * 1024 * 1024);
        assert!(config.pipeline.notify_redactions);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let raw = r#"
[gateway]
listen = "127.0.0.1:9999"
session_ttl_secs = 120

[pipeline]
custom_instructions = "prefer rust"

[[routes]]
path = "/openai"
target = "https://api.openai.com/v1"

[[providers]]
name = "main"
kind = "open_ai"
base_url = "https://api.openai.com/v1"
api_key_env = "OPENAI_API_KEY"
models = ["gpt-4o"]

[[workspaces]]
name = "default"
active = true

[[workspaces.rules]]
matcher = "filename_match"
pattern = "*.ts"
priority = 0
provider = "main"
model = "gpt-4o"

[[workspaces.rules]]
matcher = "catch_all"
priority = 1
provider = "main"
model = "gpt-4o"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.gateway.listen, "127.0.0.1:9999");
        assert_eq!(config.gateway.session_ttl_secs, 120);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.workspaces[0].rules.len(), 2);

        let compiled = config.compiled_workspaces().unwrap();
        assert_eq!(compiled.len(), 1);
        let (name, rules) = &compiled[0];
        assert_eq!(name, "default");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].route.base_url, "https://api.openai.com/v1");
        assert_eq!(
            rules[0].route.api_key_env.as_deref(),
            Some("OPENAI_API_KEY")
        );
    }

    #[test]
    fn test_invalid_rule_pattern_fails_compile() {
        let raw = r#"
[[workspaces]]
name = "default"

[[workspaces.rules]]
matcher = "filename_match"
pattern = "a{b"
priority = 0
provider = "main"
model = "m"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(matches!(
            config.compiled_workspaces(),
            Err(ConfigError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_merge_overrides_scalars_and_keys() {
        let mut base: Config = toml::from_str(
            r#"
[gateway]
listen = "127.0.0.1:8989"

[[routes]]
path = "/openai"
target = "https://api.openai.com/v1"
"#,
        )
        .unwrap();

        let overlay: Config = toml::from_str(
            r#"
[gateway]
listen = "0.0.0.0:9000"

[[routes]]
path = "/openai"
target = "https://gateway.corp/v1"

[[routes]]
path = "/anthropic"
target = "https://api.anthropic.com"
"#,
        )
        .unwrap();

        base.merge(overlay);
        assert_eq!(base.gateway.listen, "0.0.0.0:9000");
        assert_eq!(base.routes.len(), 2);
        assert_eq!(base.routes[0].target, "https://gateway.corp/v1");
    }

    #[test]
    fn test_route_entries_conversion() {
        let config: Config = toml::from_str(
            r#"
[[routes]]
path = "/anthropic"
target = "https://api.anthropic.com"
headers = { "anthropic-version" = "2023-06-01" }
"#,
        )
        .unwrap();

        let entries = config.route_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].extra_headers.len(), 1);
    }
}
