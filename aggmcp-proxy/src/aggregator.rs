//! The top-level facade: ties the Outbound Connection Manager,
//! Capability/Instruction Aggregators, Session Filter, and Selective
//! Reload Engine together behind a small typed API, exposing the combined
//! capability set of every connected downstream as a single logical
//! endpoint.
//!
//! Binding this facade to an actual inbound wire connection (HTTP, stdio,
//! whatever `ServerHandler`-style trait the chosen MCP library exposes) is
//! left to the caller — the concrete wire protocol codec and the HTTP
//! front-end framework are both treated as external collaborators. This
//! facade forwards `peer.list_tools()`/`call_tool()` calls across many
//! named upstreams, picking the right one by `providerServerName` rather
//! than always forwarding to a single cached peer.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use aggmcp_config::ValidatedConfig;
use rmcp::model::{CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult, Prompt, Tool};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capabilities::CapabilityAggregator;
use crate::connection_manager::ConnectionManager;
use crate::error::{ProxyError, ProxyResult};
use crate::filter::{apply_filter, resolve_query, FilterError};
use crate::instructions::InstructionAggregator;
use crate::presets::PresetStore;
use crate::session::SessionStore;

pub struct Aggmcp {
    connections: Arc<ConnectionManager>,
    capabilities: Arc<CapabilityAggregator>,
    instructions: Arc<InstructionAggregator>,
    sessions: Arc<SessionStore>,
    presets: Arc<PresetStore>,
}

impl Aggmcp {
    pub fn new(
        connections: Arc<ConnectionManager>,
        capabilities: Arc<CapabilityAggregator>,
        instructions: Arc<InstructionAggregator>,
        sessions: Arc<SessionStore>,
        presets: Arc<PresetStore>,
    ) -> Self {
        Self {
            connections,
            capabilities,
            instructions,
            sessions,
            presets,
        }
    }

    /// Connect every enabled server in `config`, returning a per-server
    /// outcome so the caller can surface partial failures without
    /// aborting startup: a single outbound failing to connect is marked
    /// Error/Disconnected while the others continue.
    pub async fn connect_all(&self, config: &ValidatedConfig, cancel: &CancellationToken) -> Vec<(String, ProxyResult<()>)> {
        let mut results = Vec::new();
        for (name, server_config) in config.iter() {
            if server_config.disabled {
                info!(server = name, "skipping disabled server");
                continue;
            }
            let result = self.connections.connect_with_retry(name, server_config, cancel).await;
            if let Err(e) = &result {
                warn!(server = name, error = %e, "initial connect failed, continuing with remaining servers");
            }
            results.push((name.clone(), result));
        }
        results
    }

    pub fn merged_instructions(&self) -> String {
        self.instructions.merged()
    }

    async fn server_tags(&self, config: &ValidatedConfig) -> BTreeMap<String, HashSet<String>> {
        config.iter().map(|(name, cfg)| (name.clone(), cfg.tags.clone())).collect()
    }

    /// Tools visible to `session_id` under its current tag query.
    pub async fn visible_tools(&self, session_id: &str, config: &ValidatedConfig) -> Result<Vec<Tool>, FilterError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| FilterError::Parse(format!("unknown session '{session_id}'")))?;
        let query = resolve_query(&session, &self.presets)?;
        let aggregate = self.capabilities.current();
        let tags = self.server_tags(config).await;
        let filtered = apply_filter(&query, &aggregate, &tags);
        Ok(filtered
            .tool_names
            .into_iter()
            .filter_map(|name| aggregate.tools.get(&name).map(|p| p.value.clone()))
            .collect())
    }

    pub async fn visible_prompts(&self, session_id: &str, config: &ValidatedConfig) -> Result<Vec<Prompt>, FilterError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| FilterError::Parse(format!("unknown session '{session_id}'")))?;
        let query = resolve_query(&session, &self.presets)?;
        let aggregate = self.capabilities.current();
        let tags = self.server_tags(config).await;
        let filtered = apply_filter(&query, &aggregate, &tags);
        Ok(filtered
            .prompt_names
            .into_iter()
            .filter_map(|name| aggregate.prompts.get(&name).map(|p| p.value.clone()))
            .collect())
    }

    /// Forward a tool call to whichever connected server provides it, via
    /// a per-tool lookup by `providerServerName`. Tool-call validation
    /// against session visibility is deliberately not enforced here —
    /// discovery-time filtering is assumed to be sufficient.
    pub async fn call_tool(&self, request: CallToolRequestParam) -> ProxyResult<CallToolResult> {
        let aggregate = self.capabilities.current();
        let provider = aggregate
            .tools
            .get(request.name.as_ref())
            .map(|p| p.provider_server_name.clone())
            .ok_or_else(|| ProxyError::Capability("aggregate".to_string(), request.name.to_string()))?;

        let connection = self
            .connections
            .snapshot(&provider)
            .await
            .ok_or_else(|| ProxyError::ClientNotFound(provider.clone()))?;

        let client = connection
            .client
            .as_ref()
            .ok_or_else(|| ProxyError::ClientConnectionError(provider.clone(), "not connected".to_string()))?;

        client
            .call_tool(request)
            .await
            .map_err(|e| ProxyError::ClientConnectionError(provider, e.to_string()))
    }

    pub async fn get_prompt(&self, request: GetPromptRequestParam) -> ProxyResult<GetPromptResult> {
        let aggregate = self.capabilities.current();
        let provider = aggregate
            .prompts
            .get(&request.name)
            .map(|p| p.provider_server_name.clone())
            .ok_or_else(|| ProxyError::Capability("aggregate".to_string(), request.name.clone()))?;

        let connection = self
            .connections
            .snapshot(&provider)
            .await
            .ok_or_else(|| ProxyError::ClientNotFound(provider.clone()))?;

        let client = connection
            .client
            .as_ref()
            .ok_or_else(|| ProxyError::ClientConnectionError(provider.clone(), "not connected".to_string()))?;

        client
            .get_prompt(request)
            .await
            .map_err(|e| ProxyError::ClientConnectionError(provider, e.to_string()))
    }
}
