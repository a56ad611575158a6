//! Hierarchical TOML configuration.
//!
//! See [`schema::Config`] for the structure and [`loader::ConfigLoader`] for
//! the source hierarchy and merge rules.

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::{ConfigLoader, SYSTEM_CONFIG_PATH, USER_CONFIG_DIR, USER_CONFIG_FILE};
pub use schema::{
    Config, GatewayConfig, MatcherKindConfig, PipelineConfig, ProviderConfig, RouteConfig,
    RuleConfig, WorkspaceConfig,
};
