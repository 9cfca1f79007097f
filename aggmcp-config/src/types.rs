//! The server-configuration data model and the on-disk document shape it
//! is parsed from.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// How a downstream server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
    Sse,
}

/// OAuth client configuration for an http/sse server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default, rename = "clientId")]
    pub client_id: Option<String>,
    #[serde(default, rename = "clientSecret")]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, rename = "autoRegister")]
    pub auto_register: bool,
    #[serde(default, rename = "redirectUrl")]
    pub redirect_url: Option<String>,
}

/// Template-instance settings, present only on entries under
/// `mcpTemplates`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateInstanceSettings {
    #[serde(default)]
    pub shareable: bool,
    #[serde(default, rename = "maxInstances")]
    pub max_instances: Option<u32>,
    #[serde(default, rename = "idleTimeout")]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default, rename = "perClient")]
    pub per_client: bool,
}

/// Env value as either a literal list of `KEY=VALUE` strings or a map —
/// both forms are accepted on disk and normalized to a map at load time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvMap(pub BTreeMap<String, String>);

impl<'de> Deserialize<'de> for EnvMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Map(BTreeMap<String, String>),
            List(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Map(m) => EnvMap(m),
            Raw::List(list) => {
                let mut map = BTreeMap::new();
                for entry in list {
                    if let Some((k, v)) = entry.split_once('=') {
                        map.insert(k.to_string(), v.to_string());
                    }
                }
                EnvMap(map)
            }
        })
    }
}

impl Serialize for EnvMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

/// One downstream server entry, as it appears under `mcpServers` or
/// `mcpTemplates`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub kind: Option<TransportKind>,

    // stdio-only
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: Option<EnvMap>,
    #[serde(default, rename = "inheritParentEnv")]
    pub inherit_parent_env: bool,
    #[serde(default, rename = "envFilter")]
    pub env_filter: Vec<String>,
    #[serde(default, rename = "restartOnExit")]
    pub restart_on_exit: bool,
    #[serde(default, rename = "maxRestarts")]
    pub max_restarts: Option<u32>,
    #[serde(default, rename = "restartDelay")]
    pub restart_delay_ms: Option<u64>,

    // http/sse-only
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    // common
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, rename = "connectionTimeout")]
    pub connection_timeout_ms: Option<u64>,
    #[serde(default, rename = "requestTimeout")]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,

    // template-only
    #[serde(default)]
    pub template: Option<TemplateInstanceSettings>,
}

impl ServerConfig {
    /// Infer or validate `kind`: exactly one of `command`/`url` must be
    /// present; `kind` is inferable when absent.
    pub fn resolved_kind(&self, name: &str) -> Result<TransportKind, ConfigError> {
        match (&self.command, &self.url) {
            (Some(_), Some(_)) => Err(ConfigError::validation(
                format!("mcpServers.{name}"),
                "exactly one of `command` or `url` must be present, found both",
            )),
            (None, None) => Err(ConfigError::validation(
                format!("mcpServers.{name}"),
                "exactly one of `command` or `url` must be present, found neither",
            )),
            (Some(_), None) => match self.kind {
                Some(TransportKind::Stdio) | None => Ok(TransportKind::Stdio),
                Some(other) => Err(ConfigError::validation(
                    format!("mcpServers.{name}.kind"),
                    format!("`command` is set but kind is `{other:?}`"),
                )),
            },
            (None, Some(url)) => match self.kind {
                Some(kind @ (TransportKind::Http | TransportKind::Sse)) => Ok(kind),
                Some(TransportKind::Stdio) => Err(ConfigError::validation(
                    format!("mcpServers.{name}.kind"),
                    "`url` is set but kind is `stdio`",
                )),
                None => Ok(if url.ends_with("/mcp") {
                    TransportKind::Http
                } else {
                    TransportKind::Sse
                }),
            },
        }
    }

    /// Validate shape invariants beyond what serde enforces.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        self.resolved_kind(name)?;
        if let Some(max) = self.max_restarts {
            if max == 0 && self.restart_on_exit {
                return Err(ConfigError::validation(
                    format!("mcpServers.{name}.maxRestarts"),
                    "maxRestarts of 0 with restartOnExit=true would never restart; omit restartOnExit instead",
                ));
            }
        }
        Ok(())
    }
}

/// `templateSettings` from the document root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TemplateFailureMode {
    Strict,
    Graceful,
}

impl Default for TemplateFailureMode {
    fn default() -> Self {
        Self::Graceful
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateSettings {
    #[serde(default, rename = "cacheContext")]
    pub cache_context: bool,
    #[serde(default, rename = "failureMode")]
    pub failure_mode: TemplateFailureMode,
}

/// The raw on-disk document shape.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigDocument {
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, ServerConfig>,
    #[serde(default, rename = "mcpTemplates")]
    pub mcp_templates: BTreeMap<String, ServerConfig>,
    #[serde(default, rename = "templateSettings")]
    pub template_settings: TemplateSettings,
}

/// A fully loaded, validated, rendered configuration: a flat map of name to
/// server config, static and template entries already merged (template
/// wins on name conflict).
pub type ValidatedConfig = BTreeMap<String, ServerConfig>;
