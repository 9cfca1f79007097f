//! The outbound connection record and its status lifecycle.

use rmcp::model::ServerCapabilities;
use rmcp::{Peer, RoleClient};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle status of one named downstream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
    AwaitingOAuth,
}

/// One entry in the Outbound Connection Manager's map, keyed by
/// configured server name. Mutated only by the connection manager task
/// owning this name; external readers take a clone under a read lock.
#[derive(Clone)]
pub struct OutboundConnection {
    pub name: String,
    pub status: ConnectionStatus,
    /// The live peer handle, present only while `status == Connected`.
    pub client: Option<Peer<RoleClient>>,
    pub last_connected_millis: Option<i64>,
    pub last_error: Option<String>,
    pub capabilities: Option<ServerCapabilities>,
    pub instructions: Option<String>,
    pub authorization_url: Option<String>,
    pub oauth_start_millis: Option<i64>,
    /// Ambient diagnostics: never read by control flow, only surfaced in
    /// logs and status introspection.
    pub connect_attempts: u32,
    pub created_at_millis: i64,
}

impl OutboundConnection {
    /// A fresh, not-yet-connected record for `name`.
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ConnectionStatus::Disconnected,
            client: None,
            last_connected_millis: None,
            last_error: None,
            capabilities: None,
            instructions: None,
            authorization_url: None,
            oauth_start_millis: None,
            connect_attempts: 0,
            created_at_millis: now_millis(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn mark_connected(&mut self, client: Peer<RoleClient>, capabilities: ServerCapabilities, instructions: Option<String>) {
        self.status = ConnectionStatus::Connected;
        self.client = Some(client);
        self.capabilities = Some(capabilities);
        self.instructions = instructions;
        self.last_connected_millis = Some(now_millis());
        self.last_error = None;
        self.authorization_url = None;
    }

    pub fn mark_disconnected(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.client = None;
        self.capabilities = None;
    }

    pub fn mark_error(&mut self, reason: impl Into<String>) {
        self.status = ConnectionStatus::Error;
        self.client = None;
        self.capabilities = None;
        self.last_error = Some(reason.into());
    }

    pub fn mark_awaiting_oauth(&mut self, authorization_url: impl Into<String>) {
        self.status = ConnectionStatus::AwaitingOAuth;
        self.client = None;
        self.authorization_url = Some(authorization_url.into());
        self.oauth_start_millis = Some(now_millis());
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the unix epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_connection_starts_disconnected() {
        let conn = OutboundConnection::pending("a");
        assert_eq!(conn.status, ConnectionStatus::Disconnected);
        assert!(!conn.is_connected());
    }

    #[test]
    fn mark_error_clears_client_and_capabilities() {
        let mut conn = OutboundConnection::pending("a");
        conn.mark_error("boom");
        assert_eq!(conn.status, ConnectionStatus::Error);
        assert_eq!(conn.last_error.as_deref(), Some("boom"));
        assert!(conn.client.is_none());
    }

    #[test]
    fn mark_awaiting_oauth_records_url_and_start_time() {
        let mut conn = OutboundConnection::pending("a");
        conn.mark_awaiting_oauth("https://example.com/authorize");
        assert_eq!(conn.status, ConnectionStatus::AwaitingOAuth);
        assert_eq!(conn.authorization_url.as_deref(), Some("https://example.com/authorize"));
        assert!(conn.oauth_start_millis.is_some());
    }
}
