//! The Config Loader pipeline: read → parse JSON5 → env substitute →
//! validate → split static/template → render templates → resolve name
//! conflicts.

use crate::context::ContextSnapshot;
use crate::env_substitution::EnvSubstitutor;
use crate::error::ConfigError;
use crate::renderer::{apply_failure_mode, TemplateRenderer};
use crate::types::{ConfigDocument, ServerConfig, TemplateFailureMode, ValidatedConfig};
use std::path::Path;
use tracing::{debug, warn};

/// Outcome of a single load: the merged, validated server map plus any
/// non-fatal warnings collected along the way. A fatal error short-circuits
/// via `Err` instead of appearing in this shape.
#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    pub servers: ValidatedConfig,
    pub warnings: Vec<String>,
}

/// Config Loader: deterministic for identical (bytes, env, context); never
/// mutates its inputs; the caller is responsible for atomically swapping in
/// the result.
pub struct ConfigLoader {
    env_substitution_enabled: bool,
    strict_env: bool,
    renderer: TemplateRenderer,
}

impl ConfigLoader {
    pub fn new(env_substitution_enabled: bool, strict_env: bool) -> Result<Self, ConfigError> {
        Ok(Self {
            env_substitution_enabled,
            strict_env,
            renderer: TemplateRenderer::new()?,
        })
    }

    /// Load and validate the document at `path`, rendering template servers
    /// against `ctx`.
    pub fn load(&self, path: &Path, ctx: &ContextSnapshot) -> Result<LoadOutcome, ConfigError> {
        let bytes = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        self.load_str(&bytes, path, ctx)
    }

    /// Same as [`Self::load`] but takes already-read bytes, for callers
    /// (the watcher) that read the file themselves.
    pub fn load_str(
        &self,
        bytes: &str,
        path: &Path,
        ctx: &ContextSnapshot,
    ) -> Result<LoadOutcome, ConfigError> {
        let mut value: serde_json::Value = json5::from_str(bytes)
            .map_err(|e| ConfigError::parse(path, e.to_string()))?;

        if self.env_substitution_enabled {
            let substitutor = EnvSubstitutor::new(self.strict_env);
            substitutor.substitute_value(&mut value)?;
        }

        let document: ConfigDocument = serde_json::from_value(value).map_err(|e| {
            ConfigError::validation(path.display().to_string(), format!("schema mismatch: {e}"))
        })?;

        let mut warnings = Vec::new();
        for (name, server) in &document.mcp_servers {
            server.validate(name)?;
        }
        for (name, server) in &document.mcp_templates {
            server.validate(name)?;
        }

        let mut servers: ValidatedConfig = document.mcp_servers.clone();

        for (name, template_server) in &document.mcp_templates {
            if servers.contains_key(name) {
                // Template wins, static entry is dropped.
                warnings.push(format!(
                    "server '{name}' defined both statically and as a template; \
                     the template definition wins"
                ));
            }

            let render_result =
                self.renderer
                    .render_server(name, template_server, ctx, document.template_settings.cache_context);

            let resolved = apply_failure_mode(
                name,
                render_result,
                template_server,
                document.template_settings.failure_mode,
            );

            match resolved {
                Ok(rendered) => {
                    servers.insert(name.clone(), rendered);
                }
                Err(e) => {
                    debug_assert!(
                        document.template_settings.failure_mode == TemplateFailureMode::Strict
                    );
                    return Err(e);
                }
            }
        }

        for (name, server) in &servers {
            if server.disabled {
                warnings.push(format!("server '{name}' is disabled"));
            }
        }

        if servers.is_empty() {
            debug!("config load produced zero servers");
        }

        for warning in &warnings {
            warn!("{warning}");
        }

        Ok(LoadOutcome { servers, warnings })
    }
}

/// A server config after kind resolution, ready for the Transport Factory.
/// Not stored anywhere — computed on demand so a `ValidatedConfig`
/// (`BTreeMap<String, ServerConfig>`) stays the single source of truth.
pub fn resolved_servers(
    config: &ValidatedConfig,
) -> Result<Vec<(String, ServerConfig)>, ConfigError> {
    config
        .iter()
        .map(|(name, server)| {
            server.resolved_kind(name)?;
            Ok((name.clone(), server.clone()))
        })
        .collect()
}
