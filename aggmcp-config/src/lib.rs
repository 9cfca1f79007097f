//! Config loading, watching, diffing, and template rendering for aggmcp.
//!
//! This crate owns parsing the on-disk `mcp.json`-style document,
//! substituting `${...}` environment references, validating server
//! entries, rendering template servers against a
//! [`context::ContextSnapshot`], watching the file for changes, and
//! diffing one validated config against another. It has no knowledge of
//! outbound connections, inbound sessions, or the MCP wire protocol —
//! that lives in the proxy crate, which depends on this one.

pub mod change_analyzer;
pub mod context;
pub mod env_substitution;
pub mod error;
pub mod loader;
pub mod renderer;
pub mod types;
pub mod watcher;

pub use change_analyzer::{diff_configs, ChangeType, ConfigDiff, ImpactSummary};
pub use context::ContextSnapshot;
pub use error::{ConfigError, ConfigResult};
pub use loader::{resolved_servers, ConfigLoader, LoadOutcome};
pub use types::{
    ConfigDocument, EnvMap, OAuthConfig, ServerConfig, TemplateFailureMode,
    TemplateInstanceSettings, TemplateSettings, TransportKind, ValidatedConfig,
};
pub use watcher::ConfigWatcher;
