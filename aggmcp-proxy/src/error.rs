//! Error taxonomy for everything downstream of a validated config.
//! Mirrors the shape of `aggmcp_config::ConfigError`: a `thiserror`-derived
//! enum with variant names a caller can match on directly instead of
//! parsing message strings.

use thiserror::Error;

pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("config validation failed: {0}")]
    Validation(#[from] aggmcp_config::ConfigError),

    #[error("server '{0}': config cannot produce a valid transport: {1}")]
    TransportBuild(String, String),

    #[error("server '{0}': connection attempt exceeded its timeout budget")]
    ConnectionTimeout(String),

    #[error("server '{0}' requires OAuth authorization: {1}")]
    OAuthRequired(String, String),

    #[error("server '{0}': connection failed: {1}")]
    ClientConnectionError(String, String),

    #[error("server '{0}' does not support capability '{1}'")]
    Capability(String, String),

    #[error("no connection named '{0}'")]
    ClientNotFound(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// True for the subset of errors that are never fatal to the proxy as
    /// a whole.
    pub fn is_per_server_recoverable(&self) -> bool {
        matches!(
            self,
            ProxyError::TransportBuild(..)
                | ProxyError::ConnectionTimeout(_)
                | ProxyError::OAuthRequired(..)
                | ProxyError::ClientConnectionError(..)
                | ProxyError::Cancelled(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_recoverable() {
        let err = ProxyError::ClientConnectionError("a".into(), "boom".into());
        assert!(err.is_per_server_recoverable());
    }

    #[test]
    fn client_not_found_is_not_marked_recoverable() {
        let err = ProxyError::ClientNotFound("a".into());
        assert!(!err.is_per_server_recoverable());
    }
}
