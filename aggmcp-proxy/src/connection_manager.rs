//! Outbound Connection Manager: owns the lifecycle of every downstream
//! connection — connect, retry with exponential backoff, OAuth, disconnect,
//! and the stdio restart supervisor.
//!
//! The per-name in-flight guard is a `dashmap`-backed map of
//! `tokio::sync::Mutex<()>` — a mutex per upstream used as a semaphore,
//! generalized across many named upstreams.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use aggmcp_config::{ServerConfig, TransportKind};
use dashmap::DashMap;
use rmcp::model::{ClientCapabilities, Implementation, InitializeRequestParam, ProtocolVersion};
use rmcp::service::serve_client;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capabilities::{CapabilityAggregator, ConnectionCapabilities};
use crate::connection::{ConnectionStatus, OutboundConnection};
use crate::error::ProxyError;
use crate::instructions::InstructionAggregator;
use crate::oauth::OAuthProvider;
use crate::transport::{TransportAttributes, TransportFactory};

const MAX_ATTEMPTS: u32 = 3;
const SUSTAINED_CONNECTED_THRESHOLD: Duration = Duration::from_secs(30);

/// A connection close observed after `serve_client` returns; boxed so the
/// three transport kinds (each producing a differently-monomorphized
/// `RunningService`) erase to one type once `.waiting()` is in flight.
type WaitingFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// How long to wait before retry attempt `attempt` (0-indexed), doubling
/// each time from `base`.
pub fn next_retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

fn client_info(own_name: &str) -> InitializeRequestParam {
    InitializeRequestParam {
        protocol_version: ProtocolVersion::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: own_name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("aggmcp".to_string()),
            website_url: None,
            icons: None,
        },
    }
}

struct ConnectOutcome {
    peer: rmcp::Peer<rmcp::RoleClient>,
    server_capabilities: rmcp::model::ServerCapabilities,
    capabilities: ConnectionCapabilities,
    instructions: Option<String>,
    server_name: Option<String>,
    waiting: WaitingFuture,
}

/// Fetch the full tool/resource/prompt lists a connected peer advertises,
/// using `rmcp`'s pagination-following convenience methods rather than
/// walking `nextCursor` by hand. Only queried for capabilities the
/// handshake actually advertised.
async fn discover_capabilities(
    peer: &rmcp::Peer<rmcp::RoleClient>,
    server_capabilities: &rmcp::model::ServerCapabilities,
) -> ConnectionCapabilities {
    let mut caps = ConnectionCapabilities {
        logging: server_capabilities.logging.is_some(),
        experimental: server_capabilities
            .experimental
            .as_ref()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default(),
        ..Default::default()
    };

    if server_capabilities.tools.is_some() {
        match peer.list_all_tools().await {
            Ok(tools) => caps.tools = tools.into_iter().map(|t| (t.name.to_string(), t)).collect(),
            Err(e) => warn!(error = %e, "failed to list tools after connect"),
        }
    }
    if server_capabilities.prompts.is_some() {
        match peer.list_all_prompts().await {
            Ok(prompts) => caps.prompts = prompts.into_iter().map(|p| (p.name.clone(), p)).collect(),
            Err(e) => warn!(error = %e, "failed to list prompts after connect"),
        }
    }
    if server_capabilities.resources.is_some() {
        match peer.list_all_resources().await {
            Ok(resources) => caps.resources = resources.into_iter().map(|r| (r.uri.clone(), r)).collect(),
            Err(e) => warn!(error = %e, "failed to list resources after connect"),
        }
    }

    caps
}

/// Owns every named downstream connection plus the bookkeeping needed to
/// serialize connects per name.
pub struct ConnectionManager {
    own_name: String,
    retry_delay: Duration,
    connections: DashMap<String, Arc<RwLock<OutboundConnection>>>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    oauth_providers: DashMap<String, Arc<OAuthProvider>>,
    capabilities: Arc<CapabilityAggregator>,
    instructions: Arc<InstructionAggregator>,
}

impl ConnectionManager {
    pub fn new(
        own_name: impl Into<String>,
        retry_delay: Duration,
        capabilities: Arc<CapabilityAggregator>,
        instructions: Arc<InstructionAggregator>,
    ) -> Self {
        Self {
            own_name: own_name.into(),
            retry_delay,
            connections: DashMap::new(),
            in_flight: DashMap::new(),
            oauth_providers: DashMap::new(),
            capabilities,
            instructions,
        }
    }

    fn in_flight_guard(&self, name: &str) -> Arc<Mutex<()>> {
        self.in_flight
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn snapshot(&self, name: &str) -> Option<OutboundConnection> {
        let entry = self.connections.get(name)?;
        Some(entry.read().await.clone())
    }

    pub async fn all_snapshots(&self) -> Vec<(String, OutboundConnection)> {
        let mut out = Vec::new();
        for entry in self.connections.iter() {
            out.push((entry.key().clone(), entry.value().read().await.clone()));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn remove(&self, name: &str) {
        self.connections.remove(name);
        self.in_flight.remove(name);
        self.oauth_providers.remove(name);
    }

    /// Connect with retry: up to [`MAX_ATTEMPTS`], doubling `retryDelay`
    /// between attempts. Guarded so at most one connect is in flight for
    /// `name` at a time. On success, feeds the discovered capabilities and
    /// instructions into the shared aggregators and spawns a watcher that
    /// tears both back down when the peer disconnects.
    pub async fn connect_with_retry(
        self: &Arc<Self>,
        name: &str,
        config: &ServerConfig,
        cancel: &CancellationToken,
    ) -> Result<(), ProxyError> {
        let guard = self.in_flight_guard(name);
        let _permit = guard.lock().await;

        let entry = self
            .connections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(OutboundConnection::pending(name))))
            .clone();

        let mut delay = self.retry_delay;
        let mut last_error = None;
        // Stdio retries reuse the attributes (timeouts, tags, OAuth
        // provider) computed on the first attempt instead of recomputing
        // them; HTTP/SSE rebuild both the transport and these attributes
        // every attempt since those clients cannot be restarted in place.
        let mut cached_attributes: Option<TransportAttributes> = None;

        for attempt in 0..MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return Err(ProxyError::Cancelled(format!("connect to '{name}' cancelled")));
            }

            entry.write().await.connect_attempts += 1;

            let timeout = Duration::from_millis(config.connection_timeout_ms.unwrap_or(10_000));

            match tokio::time::timeout(timeout, self.try_connect_once(name, config, &mut cached_attributes)).await {
                Ok(Ok(outcome)) => {
                    if outcome.server_name.as_deref() == Some(self.own_name.as_str()) {
                        let mut conn = entry.write().await;
                        conn.mark_error("circular dependency: downstream identifies as this proxy");
                        return Err(ProxyError::ClientConnectionError(
                            name.to_string(),
                            "circular dependency".to_string(),
                        ));
                    }

                    let change = self.capabilities.update_connection(name, outcome.capabilities);
                    self.instructions.set(name, outcome.instructions.clone());

                    let mut conn = entry.write().await;
                    conn.mark_connected(outcome.peer, outcome.server_capabilities, outcome.instructions);
                    drop(conn);

                    info!(
                        server = name,
                        attempt,
                        tools_added = change.tools_added.len(),
                        resources_added = change.resources_added.len(),
                        prompts_added = change.prompts_added.len(),
                        "connected"
                    );
                    self.spawn_disconnect_watcher(name.to_string(), Arc::clone(&entry), outcome.waiting);
                    return Ok(());
                }
                Ok(Err(ProxyError::OAuthRequired(_, auth_url))) => {
                    let mut conn = entry.write().await;
                    conn.mark_awaiting_oauth(auth_url.clone());
                    return Err(ProxyError::OAuthRequired(name.to_string(), auth_url));
                }
                Ok(Err(e)) => {
                    last_error = Some(e.to_string());
                    warn!(server = name, attempt, error = %last_error.as_deref().unwrap_or(""), "connect attempt failed");
                }
                Err(_elapsed) => {
                    last_error = Some("connection timed out".to_string());
                    warn!(server = name, attempt, "connect attempt timed out");
                }
            }

            if attempt + 1 < MAX_ATTEMPTS {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(ProxyError::Cancelled(format!("connect to '{name}' cancelled during backoff")));
                    }
                }
                delay = next_retry_delay(self.retry_delay, attempt + 1);
            }
        }

        let mut conn = entry.write().await;
        let reason = last_error.unwrap_or_else(|| "retries exhausted".to_string());
        conn.mark_error(reason.clone());
        Err(ProxyError::ClientConnectionError(name.to_string(), reason))
    }

    async fn try_connect_once(
        &self,
        name: &str,
        config: &ServerConfig,
        cached_attributes: &mut Option<TransportAttributes>,
    ) -> Result<ConnectOutcome, ProxyError> {
        let kind = config
            .resolved_kind(name)
            .map_err(|e| ProxyError::TransportBuild(name.to_string(), e.to_string()))?;
        let info = client_info(&self.own_name);

        macro_rules! finish {
            ($running:expr) => {{
                let running = $running;
                let peer = running.peer().clone();
                let server_info = running.peer_info().cloned();
                let waiting: WaitingFuture = Box::pin(async move {
                    let _ = running.waiting().await;
                });
                (peer, server_info, waiting)
            }};
        }

        let (peer, server_info, waiting) = match kind {
            TransportKind::Stdio => {
                let attributes = match cached_attributes.take() {
                    Some(attrs) => attrs,
                    None => {
                        let attrs = TransportFactory::attributes(name, config);
                        if let Some(provider) = &attrs.oauth_provider {
                            self.oauth_providers.insert(name.to_string(), provider.clone());
                        }
                        attrs
                    }
                };
                let child = TransportFactory::build_stdio_transport(name, config)?;
                *cached_attributes = Some(attributes);
                let running = serve_client(info, child)
                    .await
                    .map_err(|e| self.map_connect_error(name, e))?;
                finish!(running)
            }
            TransportKind::Http => {
                let attributes = TransportFactory::attributes(name, config);
                let transport =
                    TransportFactory::build_http_transport(name, config, attributes.oauth_provider.as_deref())?;
                if let Some(provider) = &attributes.oauth_provider {
                    self.oauth_providers.insert(name.to_string(), provider.clone());
                }
                *cached_attributes = Some(attributes);
                let running = serve_client(info, transport)
                    .await
                    .map_err(|e| self.map_connect_error(name, e))?;
                finish!(running)
            }
            TransportKind::Sse => {
                let attributes = TransportFactory::attributes(name, config);
                let transport =
                    TransportFactory::build_sse_transport(name, config, attributes.oauth_provider.as_deref()).await?;
                if let Some(provider) = &attributes.oauth_provider {
                    self.oauth_providers.insert(name.to_string(), provider.clone());
                }
                *cached_attributes = Some(attributes);
                let running = serve_client(info, transport)
                    .await
                    .map_err(|e| self.map_connect_error(name, e))?;
                finish!(running)
            }
        };

        let server_capabilities = server_info.as_ref().map(|i| i.capabilities.clone()).unwrap_or_default();
        let capabilities = discover_capabilities(&peer, &server_capabilities).await;
        let instructions = server_info.as_ref().and_then(|i| i.instructions.clone());
        let server_name = server_info.map(|i| i.server_info.name.clone());

        Ok(ConnectOutcome {
            peer,
            server_capabilities,
            capabilities,
            instructions,
            server_name,
            waiting,
        })
    }

    fn map_connect_error(&self, name: &str, e: impl std::fmt::Display) -> ProxyError {
        let msg = e.to_string();
        if msg.to_lowercase().contains("unauthorized") {
            let auth_url = self
                .oauth_providers
                .get(name)
                .map(|p| p.authorization_url())
                .unwrap_or_else(|| format!("/authorize?server={name}"));
            ProxyError::OAuthRequired(name.to_string(), auth_url)
        } else {
            ProxyError::ClientConnectionError(name.to_string(), msg)
        }
    }

    /// Wait for a connected peer to close, then mark the record
    /// disconnected and drop its contribution from both aggregators.
    fn spawn_disconnect_watcher(
        self: &Arc<Self>,
        name: String,
        entry: Arc<RwLock<OutboundConnection>>,
        waiting: WaitingFuture,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            waiting.await;
            let mut conn = entry.write().await;
            let was_connected = conn.is_connected();
            conn.mark_disconnected();
            drop(conn);
            if was_connected {
                manager.capabilities.remove_connection(&name);
                manager.instructions.clear(&name);
                info!(server = %name, "downstream connection closed");
            }
        })
    }

    /// Complete an OAuth exchange and reconnect. Only valid for http/sse
    /// servers that are currently `AwaitingOAuth`.
    pub async fn complete_oauth_and_reconnect(
        self: &Arc<Self>,
        name: &str,
        config: &ServerConfig,
        code: &str,
    ) -> Result<(), ProxyError> {
        let provider = self
            .oauth_providers
            .get(name)
            .map(|p| p.clone())
            .ok_or_else(|| ProxyError::ClientNotFound(name.to_string()))?;

        let guard = self.in_flight_guard(name);
        let _permit = guard.lock().await;

        let previous = self.snapshot(name).await;
        provider.finish_auth(code);

        let mut cached_attributes = None;
        match self.try_connect_once(name, config, &mut cached_attributes).await {
            Ok(outcome) => {
                let entry = self
                    .connections
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(RwLock::new(OutboundConnection::pending(name))))
                    .clone();
                let preserved_instructions =
                    outcome.instructions.clone().or_else(|| previous.and_then(|p| p.instructions));
                self.capabilities.update_connection(name, outcome.capabilities);
                self.instructions.set(name, preserved_instructions.clone());

                let mut conn = entry.write().await;
                conn.mark_connected(outcome.peer, outcome.server_capabilities, preserved_instructions);
                drop(conn);

                self.spawn_disconnect_watcher(name.to_string(), entry, outcome.waiting);
                Ok(())
            }
            Err(e) => {
                // Leave the previous record unchanged on failure.
                Err(e)
            }
        }
    }

    /// Restart supervisor for stdio servers with `restartOnExit`:
    /// reconnects after `restartDelay`, up to `maxRestarts` (or
    /// unlimited when unset), resetting the counter after a sustained
    /// `Connected` period.
    pub fn spawn_restart_supervisor(
        self: &Arc<Self>,
        name: String,
        config: ServerConfig,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let restart_delay = Duration::from_millis(config.restart_delay_ms.unwrap_or(1_000));
            let max_restarts = config.max_restarts;
            let mut restarts = 0u32;

            loop {
                if cancel.is_cancelled() {
                    return;
                }

                let connected_at = std::time::Instant::now();
                let result = manager.connect_with_retry(&name, &config, &cancel).await;

                if result.is_ok() {
                    // Wait until either disconnect is observed or the
                    // sustained-connected threshold resets the counter.
                    tokio::time::sleep(SUSTAINED_CONNECTED_THRESHOLD).await;
                    if connected_at.elapsed() >= SUSTAINED_CONNECTED_THRESHOLD {
                        restarts = 0;
                    }
                    continue;
                }

                restarts += 1;
                if let Some(max) = max_restarts {
                    if restarts > max {
                        warn!(server = %name, restarts, "restart supervisor giving up, maxRestarts exceeded");
                        return;
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(restart_delay) => {}
                    _ = cancel.cancelled() => return,
                }
            }
        })
    }
}

/// Snapshot-only view used by the Capability/Instruction aggregators,
/// filtering to only `Connected` entries.
pub fn connected_names(connections: &[(String, OutboundConnection)]) -> HashSet<String> {
    connections
        .iter()
        .filter(|(_, c)| c.status == ConnectionStatus::Connected)
        .map(|(n, _)| n.clone())
        .collect()
}
