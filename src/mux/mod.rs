//! Muxing rule matcher and router.
//!
//! A workspace owns an ordered list of rules; each rule pairs a matcher with
//! a destination route. Rules are evaluated strictly by ascending priority,
//! first match wins, and an empty or unmatched rule set yields an explicit
//! [`RouteResolution::NoRoute`] — never an error, never a silent default.
//!
//! The registry is an explicit service object: a mutex-guarded map from
//! workspace name to its rule list plus the single globally active workspace.
//! Reads return deep copies so callers never iterate shared state; rule-list
//! replacement is an atomic whole-list swap under the lock.

mod error;

pub use error::MuxError;

use crate::collab::ProviderRegistry;
use crate::pipeline::RequestKind;
use globset::{Glob, GlobMatcher};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// Name of the workspace that always exists.
pub const DEFAULT_WORKSPACE: &str = "default";

/// How a rule decides whether it applies to a request.
///
/// A closed set with one exhaustive dispatch; adding a matcher kind is a
/// compile-time change, not a registry entry.
#[derive(Debug, Clone)]
pub enum RuleMatcher {
    /// Always true.
    CatchAll,
    /// True when any filename referenced by the request matches the glob.
    FilenameGlob {
        /// Source pattern (kept for display and persistence).
        pattern: String,
        /// Compiled matcher.
        matcher: GlobMatcher,
    },
    /// Filename glob AND a specific request kind.
    RequestTypeGlob {
        /// Required completion kind.
        kind: RequestKind,
        /// Source pattern.
        pattern: String,
        /// Compiled matcher.
        matcher: GlobMatcher,
    },
}

impl RuleMatcher {
    /// The catch-all matcher.
    pub fn catch_all() -> Self {
        Self::CatchAll
    }

    /// A filename-glob matcher.
    ///
    /// # Errors
    ///
    /// Fails when `pattern` is not a valid glob.
    pub fn filename_glob(pattern: &str) -> Result<Self, MuxError> {
        Ok(Self::FilenameGlob {
            pattern: pattern.to_string(),
            matcher: compile(pattern)?,
        })
    }

    /// A request-kind + filename-glob matcher.
    ///
    /// # Errors
    ///
    /// Fails when `pattern` is not a valid glob.
    pub fn request_type_glob(kind: RequestKind, pattern: &str) -> Result<Self, MuxError> {
        Ok(Self::RequestTypeGlob {
            kind,
            pattern: pattern.to_string(),
            matcher: compile(pattern)?,
        })
    }

    /// Does this matcher accept the request profile?
    pub fn matches(&self, profile: &RequestProfile) -> bool {
        match self {
            Self::CatchAll => true,
            Self::FilenameGlob { matcher, .. } => {
                profile.filenames.iter().any(|f| matcher.is_match(f))
            }
            Self::RequestTypeGlob { kind, matcher, .. } => {
                profile.kind == *kind && profile.filenames.iter().any(|f| matcher.is_match(f))
            }
        }
    }
}

fn compile(pattern: &str) -> Result<GlobMatcher, MuxError> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| MuxError::InvalidGlob {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

/// A resolved destination: provider endpoint + model + auth material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    /// Provider endpoint name (key into the provider registry).
    pub provider: String,
    /// Model identifier at that provider.
    pub model: String,
    /// Base URL of the provider endpoint.
    pub base_url: String,
    /// Environment variable holding the API key, if any.
    pub api_key_env: Option<String>,
}

/// One muxing rule.
#[derive(Debug, Clone)]
pub struct MuxRule {
    /// How the rule matches.
    pub matcher: RuleMatcher,
    /// Ascending priority; lower runs first.
    pub priority: u32,
    /// Destination when the rule matches.
    pub route: ModelRoute,
}

/// The routing-relevant profile of a request.
#[derive(Debug, Clone)]
pub struct RequestProfile {
    /// Completion kind.
    pub kind: RequestKind,
    /// Filenames referenced by the request body (extracted per client type).
    pub filenames: Vec<String>,
}

/// Outcome of rule matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteResolution {
    /// A rule matched; forward to this destination.
    Route(ModelRoute),
    /// No rule matched (or the workspace has no rules).
    NoRoute,
}

struct RegistryState {
    workspaces: HashMap<String, Vec<MuxRule>>,
    active: String,
}

/// In-memory registry of muxing rules per workspace.
pub struct RuleRegistry {
    inner: Mutex<RegistryState>,
}

impl RuleRegistry {
    /// Create a registry containing the empty default workspace.
    pub fn new() -> Self {
        let mut workspaces = HashMap::new();
        workspaces.insert(DEFAULT_WORKSPACE.to_string(), Vec::new());
        Self {
            inner: Mutex::new(RegistryState {
                workspaces,
                active: DEFAULT_WORKSPACE.to_string(),
            }),
        }
    }

    /// Replace a workspace's rule list atomically (whole-list swap).
    ///
    /// Rules are stably sorted by ascending priority on the way in, so equal
    /// priorities keep their given order. Creates the workspace if needed.
    pub fn replace_rules(&self, workspace: &str, mut rules: Vec<MuxRule>) {
        rules.sort_by_key(|r| r.priority);
        let mut state = self.inner.lock().unwrap();
        state.workspaces.insert(workspace.to_string(), rules);
        debug!("Replaced rules for workspace '{workspace}'");
    }

    /// Remove a workspace. The default workspace cannot be removed; removing
    /// the active workspace re-activates the default.
    pub fn remove_workspace(&self, workspace: &str) -> bool {
        if workspace == DEFAULT_WORKSPACE {
            return false;
        }
        let mut state = self.inner.lock().unwrap();
        let removed = state.workspaces.remove(workspace).is_some();
        if removed && state.active == workspace {
            state.active = DEFAULT_WORKSPACE.to_string();
        }
        removed
    }

    /// All workspace names (deep copy).
    pub fn workspace_names(&self) -> Vec<String> {
        self.inner.lock().unwrap().workspaces.keys().cloned().collect()
    }

    /// Name of the single globally active workspace.
    pub fn active_workspace(&self) -> String {
        self.inner.lock().unwrap().active.clone()
    }

    /// Activate a workspace.
    ///
    /// # Errors
    ///
    /// Fails when the workspace does not exist.
    pub fn set_active(&self, workspace: &str) -> Result<(), MuxError> {
        let mut state = self.inner.lock().unwrap();
        if !state.workspaces.contains_key(workspace) {
            return Err(MuxError::UnknownWorkspace(workspace.to_string()));
        }
        state.active = workspace.to_string();
        debug!("Active workspace is now '{workspace}'");
        Ok(())
    }

    /// A workspace's ordered rules (deep copy; callers never iterate shared
    /// state).
    pub fn rules_for(&self, workspace: &str) -> Vec<MuxRule> {
        self.inner
            .lock()
            .unwrap()
            .workspaces
            .get(workspace)
            .cloned()
            .unwrap_or_default()
    }

    /// The active workspace's ordered rules (deep copy).
    pub fn active_rules(&self) -> Vec<MuxRule> {
        let state = self.inner.lock().unwrap();
        state
            .workspaces
            .get(&state.active)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Matches requests against the active workspace's rules and validates the
/// destination against the provider registry.
pub struct MuxRouter<P: ProviderRegistry + ?Sized> {
    registry: Arc<RuleRegistry>,
    providers: Arc<P>,
}

impl<P: ProviderRegistry + ?Sized> MuxRouter<P> {
    /// Create a router over the shared registry and provider catalog.
    pub fn new(registry: Arc<RuleRegistry>, providers: Arc<P>) -> Self {
        Self {
            registry,
            providers,
        }
    }

    /// The rule registry behind this router.
    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    /// Resolve a destination for the request profile.
    ///
    /// Rules run strictly by ascending priority; the first true predicate
    /// wins. No match yields [`RouteResolution::NoRoute`].
    ///
    /// # Errors
    ///
    /// A matched rule whose destination references a deleted provider or
    /// model is a distinct, explicit error — never silently defaulted.
    pub fn resolve(&self, profile: &RequestProfile) -> Result<RouteResolution, MuxError> {
        // Deep copy: the lock is released before any matching work.
        let rules = self.registry.active_rules();

        for rule in &rules {
            if !rule.matcher.matches(profile) {
                continue;
            }

            if !self
                .providers
                .has_model(&rule.route.provider, &rule.route.model)
            {
                return Err(MuxError::DanglingRoute {
                    provider: rule.route.provider.clone(),
                    model: rule.route.model.clone(),
                });
            }

            trace!(
                "Rule (priority {}) routed request to {}/{}",
                rule.priority,
                rule.route.provider,
                rule.route.model
            );
            return Ok(RouteResolution::Route(rule.route.clone()));
        }

        Ok(RouteResolution::NoRoute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{ProviderEndpoint, ProviderKind, StaticProviderRegistry};
    use std::sync::Arc;

    fn route(provider: &str, model: &str) -> ModelRoute {
        ModelRoute {
            provider: provider.to_string(),
            model: model.to_string(),
            base_url: "https://llm.internal".to_string(),
            api_key_env: None,
        }
    }

    fn providers() -> Arc<StaticProviderRegistry> {
        Arc::new(StaticProviderRegistry::new(vec![(
            ProviderEndpoint {
                name: "main".to_string(),
                kind: ProviderKind::OpenAi,
                base_url: "https://llm.internal".to_string(),
                api_key_env: None,
            },
            vec!["fast-model".to_string(), "smart-model".to_string()],
        )]))
    }

    fn profile(kind: RequestKind, filenames: &[&str]) -> RequestProfile {
        RequestProfile {
            kind,
            filenames: filenames.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn router_with_rules(rules: Vec<MuxRule>) -> MuxRouter<StaticProviderRegistry> {
        let registry = Arc::new(RuleRegistry::new());
        registry.replace_rules(DEFAULT_WORKSPACE, rules);
        MuxRouter::new(registry, providers())
    }

    #[test]
    fn test_priority_order_first_match_wins() {
        let router = router_with_rules(vec![
            MuxRule {
                matcher: RuleMatcher::filename_glob("*.ts").unwrap(),
                priority: 0,
                route: route("main", "smart-model"),
            },
            MuxRule {
                matcher: RuleMatcher::catch_all(),
                priority: 1,
                route: route("main", "fast-model"),
            },
        ]);

        // A .ts file hits the priority-0 rule.
        match router
            .resolve(&profile(RequestKind::Chat, &["src/app.ts"]))
            .unwrap()
        {
            RouteResolution::Route(r) => assert_eq!(r.model, "smart-model"),
            RouteResolution::NoRoute => panic!("expected a route"),
        }

        // A .py file falls through to the catch-all.
        match router
            .resolve(&profile(RequestKind::Chat, &["app.py"]))
            .unwrap()
        {
            RouteResolution::Route(r) => assert_eq!(r.model, "fast-model"),
            RouteResolution::NoRoute => panic!("expected the catch-all"),
        }
    }

    #[test]
    fn test_empty_rules_yield_no_route() {
        let router = router_with_rules(Vec::new());
        assert_eq!(
            router.resolve(&profile(RequestKind::Chat, &["a.rs"])).unwrap(),
            RouteResolution::NoRoute
        );
    }

    #[test]
    fn test_request_type_matcher() {
        let router = router_with_rules(vec![MuxRule {
            matcher: RuleMatcher::request_type_glob(RequestKind::FillInMiddle, "*.rs").unwrap(),
            priority: 0,
            route: route("main", "fast-model"),
        }]);

        // Same filename, wrong kind: no route.
        assert_eq!(
            router
                .resolve(&profile(RequestKind::Chat, &["lib.rs"]))
                .unwrap(),
            RouteResolution::NoRoute
        );
        // Right kind: routed.
        assert!(matches!(
            router
                .resolve(&profile(RequestKind::FillInMiddle, &["lib.rs"]))
                .unwrap(),
            RouteResolution::Route(_)
        ));
    }

    #[test]
    fn test_dangling_route_is_distinct_error() {
        let router = router_with_rules(vec![MuxRule {
            matcher: RuleMatcher::catch_all(),
            priority: 0,
            route: route("main", "deleted-model"),
        }]);

        assert!(matches!(
            router.resolve(&profile(RequestKind::Chat, &[])),
            Err(MuxError::DanglingRoute { .. })
        ));
    }

    #[test]
    fn test_equal_priority_keeps_insertion_order() {
        let router = router_with_rules(vec![
            MuxRule {
                matcher: RuleMatcher::catch_all(),
                priority: 5,
                route: route("main", "fast-model"),
            },
            MuxRule {
                matcher: RuleMatcher::catch_all(),
                priority: 5,
                route: route("main", "smart-model"),
            },
        ]);

        match router.resolve(&profile(RequestKind::Chat, &[])).unwrap() {
            RouteResolution::Route(r) => assert_eq!(r.model, "fast-model"),
            RouteResolution::NoRoute => panic!("expected a route"),
        }
    }

    #[test]
    fn test_invalid_glob_rejected() {
        assert!(matches!(
            RuleMatcher::filename_glob("a{b"),
            Err(MuxError::InvalidGlob { .. })
        ));
    }

    #[test]
    fn test_registry_replace_is_atomic_swap() {
        let registry = RuleRegistry::new();
        registry.replace_rules(
            DEFAULT_WORKSPACE,
            vec![MuxRule {
                matcher: RuleMatcher::catch_all(),
                priority: 3,
                route: route("main", "fast-model"),
            }],
        );
        assert_eq!(registry.active_rules().len(), 1);

        registry.replace_rules(DEFAULT_WORKSPACE, Vec::new());
        assert!(registry.active_rules().is_empty());
    }

    #[test]
    fn test_registry_reads_are_copies() {
        let registry = RuleRegistry::new();
        registry.replace_rules(
            DEFAULT_WORKSPACE,
            vec![MuxRule {
                matcher: RuleMatcher::catch_all(),
                priority: 0,
                route: route("main", "fast-model"),
            }],
        );

        let mut copy = registry.active_rules();
        copy.clear();
        assert_eq!(registry.active_rules().len(), 1);
    }

    #[test]
    fn test_workspace_activation() {
        let registry = RuleRegistry::new();
        assert_eq!(registry.active_workspace(), DEFAULT_WORKSPACE);

        registry.replace_rules("team-a", Vec::new());
        registry.set_active("team-a").unwrap();
        assert_eq!(registry.active_workspace(), "team-a");

        assert!(matches!(
            registry.set_active("ghost"),
            Err(MuxError::UnknownWorkspace(_))
        ));

        // Removing the active workspace falls back to default.
        assert!(registry.remove_workspace("team-a"));
        assert_eq!(registry.active_workspace(), DEFAULT_WORKSPACE);
        assert!(!registry.remove_workspace(DEFAULT_WORKSPACE));
    }

    #[test]
    fn test_rules_sorted_by_priority_on_replace() {
        let registry = RuleRegistry::new();
        registry.replace_rules(
            DEFAULT_WORKSPACE,
            vec![
                MuxRule {
                    matcher: RuleMatcher::catch_all(),
                    priority: 9,
                    route: route("main", "fast-model"),
                },
                MuxRule {
                    matcher: RuleMatcher::catch_all(),
                    priority: 1,
                    route: route("main", "smart-model"),
                },
            ],
        );

        let rules = registry.active_rules();
        assert_eq!(rules[0].priority, 1);
        assert_eq!(rules[1].priority, 9);
    }
}
