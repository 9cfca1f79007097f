//! OAuth provider abstraction: a narrow interface the core depends on
//! instead of any particular OAuth/transport shim. HTTP/SSE transports are
//! handed an `OAuthProvider` and never touch the token exchange directly.

use aggmcp_config::OAuthConfig;
use std::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_millis: Option<i64>,
}

/// Bound to a single server name; holds client credentials and whatever
/// tokens have been negotiated so far.
pub struct OAuthProvider {
    server_name: String,
    config: OAuthConfig,
    tokens: RwLock<Option<OAuthTokens>>,
}

impl OAuthProvider {
    pub fn new(server_name: impl Into<String>, config: OAuthConfig) -> Self {
        Self {
            server_name: server_name.into(),
            config,
            tokens: RwLock::new(None),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Build the authorization URL the caller should present to the user.
    /// A stub redirect endpoint is used when `redirectUrl` is unset, since
    /// the interactive callback listener is left as an external
    /// collaborator.
    pub fn authorization_url(&self) -> String {
        let redirect = self
            .config
            .redirect_url
            .clone()
            .unwrap_or_else(|| "http://localhost:0/callback".to_string());
        let client_id = self.config.client_id.as_deref().unwrap_or("");
        let scope = self.config.scopes.join("%20");
        format!(
            "/authorize?client_id={client_id}&redirect_uri={redirect}&scope={scope}&server={}",
            self.server_name
        )
    }

    /// Exchange an authorization code for tokens. In the absence of a real
    /// OAuth endpoint to call (the HTTP client and token endpoint are
    /// server-specific and supplied by the transport at connect time),
    /// this records the code as an opaque bearer token — callers that need
    /// real token exchange supply it via [`Self::set_tokens`] once the
    /// transport's own handshake completes.
    pub fn finish_auth(&self, code: &str) -> OAuthTokens {
        let tokens = OAuthTokens {
            access_token: code.to_string(),
            refresh_token: None,
            expires_at_millis: None,
        };
        *self.tokens.write().expect("oauth token lock poisoned") = Some(tokens.clone());
        tokens
    }

    pub fn set_tokens(&self, tokens: OAuthTokens) {
        *self.tokens.write().expect("oauth token lock poisoned") = Some(tokens);
    }

    pub fn current_tokens(&self) -> Option<OAuthTokens> {
        self.tokens.read().expect("oauth token lock poisoned").clone()
    }

    pub fn bearer_header(&self) -> Option<String> {
        self.current_tokens().map(|t| format!("Bearer {}", t.access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_url_includes_client_id_and_server_name() {
        let provider = OAuthProvider::new(
            "srv",
            OAuthConfig {
                client_id: Some("abc123".into()),
                scopes: vec!["read".into(), "write".into()],
                ..Default::default()
            },
        );
        let url = provider.authorization_url();
        assert!(url.contains("client_id=abc123"));
        assert!(url.contains("server=srv"));
        assert!(url.contains("scope=read%20write"));
    }

    #[test]
    fn finish_auth_stores_tokens_and_bearer_header_reflects_them() {
        let provider = OAuthProvider::new("srv", OAuthConfig::default());
        assert!(provider.bearer_header().is_none());
        provider.finish_auth("code123");
        assert_eq!(provider.bearer_header().as_deref(), Some("Bearer code123"));
    }
}
