//! Template rendering for template servers: a thin `liquid::Parser` plus a
//! render cache keyed on context hash.

use crate::context::ContextSnapshot;
use crate::error::ConfigError;
use crate::types::{ServerConfig, TemplateFailureMode};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Renders template-server string fields against a [`ContextSnapshot`],
/// optionally caching renders by the snapshot's content hash.
pub struct TemplateRenderer {
    parser: liquid::Parser,
    /// `content_hash -> already-rendered ServerConfig`, one entry per
    /// distinct (server name, context) pair.
    cache: Mutex<HashMap<(String, String), ServerConfig>>,
}

impl TemplateRenderer {
    pub fn new() -> Result<Self, ConfigError> {
        let parser = liquid::ParserBuilder::with_stdlib()
            .build()
            .map_err(|e| ConfigError::render("<parser>", e.to_string()))?;
        Ok(Self {
            parser,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn render_string(&self, template: &str, ctx: &ContextSnapshot) -> Result<String, ConfigError> {
        let parsed = self
            .parser
            .parse(template)
            .map_err(|e| ConfigError::render("<template>", format!("parse error: {e}")))?;
        parsed
            .render(&ctx.to_liquid_object())
            .map_err(|e| ConfigError::render("<template>", format!("render error: {e}")))
    }

    /// Render every string-valued field of `config` against `ctx`.
    ///
    /// Honors `cache_context`: a hit returns the cached render without
    /// touching the parser. On failure, `failure_mode` decides whether the
    /// caller should abort the whole load (`Strict`) or keep the unrendered
    /// config with a warning (`Graceful`) — the caller applies that policy;
    /// this function always returns `Err` on failure so the caller can
    /// decide.
    pub fn render_server(
        &self,
        name: &str,
        config: &ServerConfig,
        ctx: &ContextSnapshot,
        cache_context: bool,
    ) -> Result<ServerConfig, ConfigError> {
        let hash = ctx.content_hash();
        let cache_key = (name.to_string(), hash.clone());

        if cache_context {
            if let Some(cached) = self.cache.lock().expect("cache mutex poisoned").get(&cache_key)
            {
                debug!(server = name, hash = %hash, "template render cache hit");
                return Ok(cached.clone());
            }
        }

        let mut rendered = config.clone();
        rendered.command = config
            .command
            .as_deref()
            .map(|t| self.render_string(t, ctx))
            .transpose()?;
        rendered.url = config
            .url
            .as_deref()
            .map(|t| self.render_string(t, ctx))
            .transpose()?;
        rendered.cwd = config
            .cwd
            .as_deref()
            .map(|t| self.render_string(t, ctx))
            .transpose()?;
        rendered.args = config
            .args
            .iter()
            .map(|a| self.render_string(a, ctx))
            .collect::<Result<_, _>>()?;

        if let Some(env) = &config.env {
            let mut rendered_env = std::collections::BTreeMap::new();
            for (k, v) in &env.0 {
                rendered_env.insert(k.clone(), self.render_string(v, ctx)?);
            }
            rendered.env = Some(crate::types::EnvMap(rendered_env));
        }

        let mut rendered_headers = std::collections::BTreeMap::new();
        for (k, v) in &config.headers {
            rendered_headers.insert(k.clone(), self.render_string(v, ctx)?);
        }
        rendered.headers = rendered_headers;

        if cache_context {
            self.cache
                .lock()
                .expect("cache mutex poisoned")
                .insert(cache_key, rendered.clone());
        }

        Ok(rendered)
    }
}

/// Apply `failure_mode` to a render result: `Strict` propagates the error,
/// `Graceful` falls back to the unrendered config with a warning.
pub fn apply_failure_mode(
    name: &str,
    result: Result<ServerConfig, ConfigError>,
    unrendered: &ServerConfig,
    failure_mode: TemplateFailureMode,
) -> Result<ServerConfig, ConfigError> {
    match (result, failure_mode) {
        (Ok(rendered), _) => Ok(rendered),
        (Err(e), TemplateFailureMode::Strict) => Err(e),
        (Err(e), TemplateFailureMode::Graceful) => {
            warn!(server = name, error = %e, "template render failed, keeping unrendered config");
            Ok(unrendered.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextSnapshot, ProjectContext};

    fn ctx(project_name: &str) -> ContextSnapshot {
        ContextSnapshot {
            project: ProjectContext {
                name: project_name.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn renders_command_and_args_against_project_name() {
        let renderer = TemplateRenderer::new().unwrap();
        let config = ServerConfig {
            command: Some("run-{{project.name}}".into()),
            args: vec!["--project={{project.name}}".into()],
            ..Default::default()
        };
        let rendered = renderer
            .render_server("s", &config, &ctx("widgets"), false)
            .unwrap();
        assert_eq!(rendered.command.as_deref(), Some("run-widgets"));
        assert_eq!(rendered.args[0], "--project=widgets");
    }

    #[test]
    fn cache_hit_returns_identical_render_for_identical_context_hash() {
        let renderer = TemplateRenderer::new().unwrap();
        let config = ServerConfig {
            command: Some("run-{{project.name}}".into()),
            ..Default::default()
        };
        let c = ctx("widgets");
        let first = renderer.render_server("s", &config, &c, true).unwrap();
        let second = renderer.render_server("s", &config, &c, true).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn graceful_failure_mode_keeps_unrendered_config() {
        let config = ServerConfig {
            command: Some("{{unclosed".into()),
            ..Default::default()
        };
        let renderer = TemplateRenderer::new().unwrap();
        let result = renderer.render_server("s", &config, &ctx("x"), false);
        let resolved =
            apply_failure_mode("s", result, &config, TemplateFailureMode::Graceful).unwrap();
        assert_eq!(resolved.command, config.command);
    }

    #[test]
    fn strict_failure_mode_propagates_error() {
        let config = ServerConfig {
            command: Some("{{unclosed".into()),
            ..Default::default()
        };
        let renderer = TemplateRenderer::new().unwrap();
        let result = renderer.render_server("s", &config, &ctx("x"), false);
        assert!(apply_failure_mode("s", result, &config, TemplateFailureMode::Strict).is_err());
    }
}
