//! Transport Factory: turns a validated [`aggmcp_config::ServerConfig`]
//! into an `rmcp` transport ready to hand to `serve_client`/
//! `ClientInfo::serve`, matching on transport kind: stdio builds a
//! `tokio::process::Command` + `TokioChildProcess`, HTTP builds a
//! `StreamableHttpClientTransport::from_uri`, SSE builds a
//! `SseClientTransport::start(url)`.

use aggmcp_common::env_filter::{is_sensitive_name, matches_any_prefix};
use aggmcp_config::{ServerConfig, TransportKind};
use rmcp::transport::sse_client::SseClientTransport;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransport;
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use crate::error::ProxyError;
use crate::oauth::OAuthProvider;

/// A curated baseline passed to every stdio child, mirroring what a shell
/// would already provide so `PATH`-relying tools keep working even when
/// `inheritParentEnv` is false.
const DEFAULT_STDIO_ENV: &[(&str, &str)] = &[("PATH", "/usr/local/bin:/usr/bin:/bin")];

/// The constructed transport plus metadata the connection manager needs
/// but `rmcp` itself doesn't carry (timeouts, tags, the OAuth provider).
pub enum BuiltTransport {
    Stdio(TokioChildProcess),
    Http(StreamableHttpClientTransport<reqwest::Client>),
    Sse(SseClientTransport<reqwest::Client>),
}

pub struct TransportAttributes {
    pub connection_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub tags: std::collections::HashSet<String>,
    pub oauth_provider: Option<Arc<OAuthProvider>>,
}

const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

pub struct TransportFactory;

impl TransportFactory {
    /// Assemble the environment for a stdio child: curated defaults, then
    /// (if `inheritParentEnv`) the parent environment
    /// filtered through `envFilter` prefixes and the sensitive-name
    /// blocklist, then the user-specified `env` on top (highest
    /// precedence).
    pub fn build_stdio_env(config: &ServerConfig) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = DEFAULT_STDIO_ENV
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        if config.inherit_parent_env {
            for (key, value) in std::env::vars() {
                if is_sensitive_name(&key) {
                    continue;
                }
                if !config.env_filter.is_empty() && !matches_any_prefix(&key, &config.env_filter) {
                    continue;
                }
                env.insert(key, value);
            }
        }

        if let Some(user_env) = &config.env {
            for (key, value) in &user_env.0 {
                env.insert(key.clone(), value.clone());
            }
        }

        env
    }

    pub(crate) fn attributes(name: &str, config: &ServerConfig) -> TransportAttributes {
        let oauth_provider = config
            .oauth
            .clone()
            .map(|cfg| Arc::new(OAuthProvider::new(name, cfg)));

        TransportAttributes {
            connection_timeout_ms: config.connection_timeout_ms.unwrap_or(DEFAULT_CONNECTION_TIMEOUT_MS),
            request_timeout_ms: config.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            tags: config.tags.clone(),
            oauth_provider,
        }
    }

    /// Build a fresh stdio child process. Split out from [`Self::build`] so
    /// a retrying caller can rebuild just the child without recomputing
    /// attributes (timeouts, tags, the OAuth provider) on every attempt.
    pub(crate) fn build_stdio_transport(name: &str, config: &ServerConfig) -> Result<TokioChildProcess, ProxyError> {
        let command_str = config
            .command
            .as_deref()
            .ok_or_else(|| ProxyError::TransportBuild(name.to_string(), "stdio server has no command".into()))?;
        let args = config.args.clone();
        let cwd = config.cwd.clone();
        let env = Self::build_stdio_env(config);

        debug!(server = name, command = command_str, "building stdio transport");

        TokioChildProcess::new(Command::new(command_str).configure(|cmd| {
            cmd.args(&args);
            if let Some(cwd) = &cwd {
                cmd.current_dir(cwd);
            }
            cmd.envs(&env);
            cmd.stderr(std::process::Stdio::null());
        }))
        .map_err(|e| ProxyError::TransportBuild(name.to_string(), e.to_string()))
    }

    pub(crate) fn build_http_transport(
        name: &str,
        config: &ServerConfig,
        oauth_provider: Option<&OAuthProvider>,
    ) -> Result<StreamableHttpClientTransport<reqwest::Client>, ProxyError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| ProxyError::TransportBuild(name.to_string(), "http server has no url".into()))?;
        debug!(server = name, url, "building http transport");
        let client = build_http_client(config, oauth_provider)
            .map_err(|e| ProxyError::TransportBuild(name.to_string(), e.to_string()))?;
        Ok(StreamableHttpClientTransport::with_client(client, url.to_string()))
    }

    pub(crate) async fn build_sse_transport(
        name: &str,
        config: &ServerConfig,
        oauth_provider: Option<&OAuthProvider>,
    ) -> Result<SseClientTransport<reqwest::Client>, ProxyError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| ProxyError::TransportBuild(name.to_string(), "sse server has no url".into()))?;
        debug!(server = name, url, "building sse transport");
        let client = build_http_client(config, oauth_provider)
            .map_err(|e| ProxyError::TransportBuild(name.to_string(), e.to_string()))?;
        SseClientTransport::start_with_client(client, url.to_string())
            .await
            .map_err(|e| ProxyError::TransportBuild(name.to_string(), e.to_string()))
    }

    /// Build the transport plus its attributes for `name`/`config`. The
    /// config must already have passed [`ServerConfig::validate`] (and
    /// therefore resolves to exactly one `TransportKind`). Rebuilds
    /// everything from scratch, including the OAuth provider; callers that
    /// retry a stdio connection without a config change can skip this and
    /// call [`Self::build_stdio_transport`] directly.
    pub async fn build(
        name: &str,
        config: &ServerConfig,
    ) -> Result<(BuiltTransport, TransportAttributes), ProxyError> {
        let kind = config
            .resolved_kind(name)
            .map_err(|e| ProxyError::TransportBuild(name.to_string(), e.to_string()))?;
        let attributes = Self::attributes(name, config);

        let transport = match kind {
            TransportKind::Stdio => BuiltTransport::Stdio(Self::build_stdio_transport(name, config)?),
            TransportKind::Http => {
                BuiltTransport::Http(Self::build_http_transport(name, config, attributes.oauth_provider.as_deref())?)
            }
            TransportKind::Sse => BuiltTransport::Sse(
                Self::build_sse_transport(name, config, attributes.oauth_provider.as_deref()).await?,
            ),
        };

        Ok((transport, attributes))
    }
}

fn build_http_client(
    config: &ServerConfig,
    oauth_provider: Option<&OAuthProvider>,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::USER_AGENT,
        reqwest::header::HeaderValue::from_static(concat!("aggmcp/", env!("CARGO_PKG_VERSION"))),
    );
    for (key, value) in &config.headers {
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(key.as_bytes()),
            reqwest::header::HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    if let Some(provider) = oauth_provider {
        if let Some(bearer) = provider.bearer_header() {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&bearer) {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }
    }

    reqwest::Client::builder().default_headers(headers).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggmcp_config::EnvMap;
    use std::collections::BTreeMap as Map;

    #[test]
    fn default_env_includes_path_when_not_inheriting() {
        let config = ServerConfig {
            command: Some("echo".into()),
            ..Default::default()
        };
        let env = TransportFactory::build_stdio_env(&config);
        assert!(env.contains_key("PATH"));
    }

    #[test]
    fn inherit_parent_env_respects_sensitive_blocklist() {
        std::env::set_var("AGGMCP_TEST_TOKEN_SECRET", "leak-me-not");
        std::env::set_var("AGGMCP_TEST_SAFE", "fine");
        let config = ServerConfig {
            command: Some("echo".into()),
            inherit_parent_env: true,
            ..Default::default()
        };
        let env = TransportFactory::build_stdio_env(&config);
        assert!(!env.contains_key("AGGMCP_TEST_TOKEN_SECRET"));
        assert!(env.contains_key("AGGMCP_TEST_SAFE"));
        std::env::remove_var("AGGMCP_TEST_TOKEN_SECRET");
        std::env::remove_var("AGGMCP_TEST_SAFE");
    }

    #[test]
    fn inherit_parent_env_respects_prefix_allowlist() {
        std::env::set_var("AGGMCP_ALLOWED_X", "yes");
        std::env::set_var("AGGMCP_OTHER_Y", "no");
        let config = ServerConfig {
            command: Some("echo".into()),
            inherit_parent_env: true,
            env_filter: vec!["AGGMCP_ALLOWED".to_string()],
            ..Default::default()
        };
        let env = TransportFactory::build_stdio_env(&config);
        assert!(env.contains_key("AGGMCP_ALLOWED_X"));
        assert!(!env.contains_key("AGGMCP_OTHER_Y"));
        std::env::remove_var("AGGMCP_ALLOWED_X");
        std::env::remove_var("AGGMCP_OTHER_Y");
    }

    #[test]
    fn user_env_overrides_inherited_and_default_values() {
        let mut user_env = Map::new();
        user_env.insert("PATH".to_string(), "/custom/bin".to_string());
        let config = ServerConfig {
            command: Some("echo".into()),
            env: Some(EnvMap(user_env)),
            ..Default::default()
        };
        let env = TransportFactory::build_stdio_env(&config);
        assert_eq!(env.get("PATH"), Some(&"/custom/bin".to_string()));
    }
}
