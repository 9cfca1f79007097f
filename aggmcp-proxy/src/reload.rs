//! Selective Reload Engine: orchestrates add/remove/replace against the
//! Outbound Connection Manager using Change Analyzer output, without
//! tearing down connections unaffected by a config change.

use std::sync::Arc;
use std::time::Duration;

use aggmcp_config::{diff_configs, ChangeType, ConfigDiff, ValidatedConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::capabilities::CapabilityAggregator;
use crate::connection_manager::ConnectionManager;
use crate::instructions::InstructionAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadStrategy {
    Full,
    Partial,
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadState {
    Pending,
    Analyzing,
    Preparing,
    Reloading,
    Completed,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone)]
pub enum ReloadEvent {
    Started,
    Progress(u8),
    Completed,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Default)]
pub struct ReloadOptions {
    pub strategy_override: Option<ReloadStrategy>,
    pub force_full_reload: bool,
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct ReloadOutcome {
    pub state: ReloadState,
    pub diff: ConfigDiff,
    pub strategy: ReloadStrategy,
    pub per_server_errors: Vec<(String, String)>,
}

pub struct ReloadEngine {
    connections: Arc<ConnectionManager>,
    capabilities: Arc<CapabilityAggregator>,
    instructions: Arc<InstructionAggregator>,
}

impl ReloadEngine {
    pub fn new(
        connections: Arc<ConnectionManager>,
        capabilities: Arc<CapabilityAggregator>,
        instructions: Arc<InstructionAggregator>,
    ) -> Self {
        Self {
            connections,
            capabilities,
            instructions,
        }
    }

    fn choose_strategy(diff: &ConfigDiff, options: &ReloadOptions) -> ReloadStrategy {
        if let Some(strategy) = options.strategy_override {
            return strategy;
        }
        if options.force_full_reload {
            return ReloadStrategy::Full;
        }
        if diff.changes.is_empty() {
            return ReloadStrategy::Partial;
        }
        // tagsChange-only and transportChange both recommend `partial`;
        // everything else does too, in this proxy (there is no
        // proxy-level transport to force a `full` restart over). `Full`
        // only happens via an explicit override or `force_full_reload`.
        ReloadStrategy::Partial
    }

    /// Execute a reload. `events` is optional progress reporting; the
    /// caller may drop the receiver if it doesn't care.
    pub async fn execute_reload(
        &self,
        old_config: &ValidatedConfig,
        new_config: &ValidatedConfig,
        options: ReloadOptions,
        events: Option<mpsc::Sender<ReloadEvent>>,
        cancel: &CancellationToken,
    ) -> ReloadOutcome {
        let _ = events.as_ref().map(|tx| tx.try_send(ReloadEvent::Started));

        let diff = diff_configs(old_config, new_config);
        let strategy = Self::choose_strategy(&diff, &options);

        if diff.changes.is_empty() {
            let _ = events.as_ref().map(|tx| tx.try_send(ReloadEvent::Completed));
            return ReloadOutcome {
                state: ReloadState::Completed,
                diff,
                strategy,
                per_server_errors: Vec::new(),
            };
        }

        if options.dry_run {
            info!(total = diff.impact.total(), strategy = ?strategy, "dry run reload plan computed");
            let _ = events.as_ref().map(|tx| tx.try_send(ReloadEvent::Completed));
            return ReloadOutcome {
                state: ReloadState::Completed,
                diff,
                strategy,
                per_server_errors: Vec::new(),
            };
        }

        match strategy {
            ReloadStrategy::Full => {
                return self.execute_full_reload(new_config, diff, strategy, events, cancel).await;
            }
            ReloadStrategy::Deferred => {
                info!(total = diff.impact.total(), "reload deferred, diff computed but not applied");
                let _ = events.as_ref().map(|tx| tx.try_send(ReloadEvent::Completed));
                return ReloadOutcome {
                    state: ReloadState::Pending,
                    diff,
                    strategy,
                    per_server_errors: Vec::new(),
                };
            }
            ReloadStrategy::Partial => {}
        }

        let mut per_server_errors = Vec::new();
        let total = diff.changes.len().max(1);

        // Ordering policy: removes before adds of the same name; otherwise
        // stable by name. diff_configs already returns name-sorted
        // records with Remove preceding Add for an identical name because
        // `R` < `A` is false lexically — so explicitly partition instead
        // of relying on sort order.
        let mut ordered = diff.changes.clone();
        ordered.sort_by_key(|c| match c {
            ChangeType::RemoveServer { .. } => 0,
            ChangeType::TagsChange { .. } => 1,
            ChangeType::ModifyServer { .. } | ChangeType::TransportChange { .. } => 2,
            ChangeType::AddServer { .. } => 3,
        });

        for (index, change) in ordered.iter().enumerate() {
            if cancel.is_cancelled() {
                let _ = events.as_ref().map(|tx| tx.try_send(ReloadEvent::Cancelled));
                return ReloadOutcome {
                    state: ReloadState::Failed,
                    diff,
                    strategy,
                    per_server_errors,
                };
            }

            if let Err(e) = self.apply_change(change, new_config, cancel).await {
                warn!(server = change.server_name(), error = %e, "reload: per-server change failed, continuing");
                per_server_errors.push((change.server_name().to_string(), e));
            }

            let progress = (((index + 1) * 100) / total) as u8;
            let _ = events.as_ref().map(|tx| tx.try_send(ReloadEvent::Progress(progress)));
        }

        let state = if per_server_errors.len() == diff.changes.len() && !diff.changes.is_empty() {
            error!("reload: every change failed, marking operation Failed");
            ReloadState::Failed
        } else {
            ReloadState::Completed
        };

        match &state {
            ReloadState::Completed => {
                let _ = events.as_ref().map(|tx| tx.try_send(ReloadEvent::Completed));
            }
            ReloadState::Failed => {
                let _ = events
                    .as_ref()
                    .map(|tx| tx.try_send(ReloadEvent::Failed("all changes failed".to_string())));
            }
            _ => {}
        }

        ReloadOutcome {
            state,
            diff,
            strategy,
            per_server_errors,
        }
    }

    async fn apply_change(
        &self,
        change: &ChangeType,
        new_config: &ValidatedConfig,
        cancel: &CancellationToken,
    ) -> Result<(), String> {
        match change {
            ChangeType::RemoveServer { name } => {
                self.connections.remove(name);
                self.capabilities.remove_connection(name);
                self.instructions.clear(name);
                Ok(())
            }
            ChangeType::AddServer { name } => {
                let config = new_config
                    .get(name)
                    .ok_or_else(|| format!("'{name}' missing from new config during add"))?;
                if config.disabled {
                    info!(server = name, "skipping disabled server (add)");
                    return Ok(());
                }
                self.connections
                    .connect_with_retry(name, config, cancel)
                    .await
                    .map_err(|e| e.to_string())
            }
            ChangeType::ModifyServer { name } | ChangeType::TransportChange { name, .. } => {
                self.connections.remove(name);
                self.capabilities.remove_connection(name);
                self.instructions.clear(name);
                let config = new_config
                    .get(name)
                    .ok_or_else(|| format!("'{name}' missing from new config during modify"))?;
                if config.disabled {
                    info!(server = name, "server disabled after modify, leaving disconnected");
                    return Ok(());
                }
                self.connections
                    .connect_with_retry(name, config, cancel)
                    .await
                    .map_err(|e| e.to_string())
            }
            ChangeType::TagsChange { name, .. } => {
                // Metadata-only: no reconnect. The Session Filter picks up
                // the new tags from `new_config` directly on next filter
                // pass; nothing to mutate on the connection record itself.
                info!(server = name, "tags-only change applied, no reconnect");
                Ok(())
            }
        }
    }

    /// Close every connection and reconnect every non-disabled server in
    /// `new_config` from scratch. Used only when the caller explicitly
    /// forces a full reload or overrides the strategy — the diff-driven
    /// partial path covers every change this proxy can produce on its own.
    async fn execute_full_reload(
        &self,
        new_config: &ValidatedConfig,
        diff: ConfigDiff,
        strategy: ReloadStrategy,
        events: Option<mpsc::Sender<ReloadEvent>>,
        cancel: &CancellationToken,
    ) -> ReloadOutcome {
        for (name, _) in self.connections.all_snapshots().await {
            self.connections.remove(&name);
            self.capabilities.remove_connection(&name);
            self.instructions.clear(&name);
        }

        let enabled: Vec<(String, &aggmcp_config::ServerConfig)> =
            new_config.iter().filter(|(_, c)| !c.disabled).map(|(n, c)| (n.clone(), c)).collect();
        let total = enabled.len().max(1);
        let mut per_server_errors = Vec::new();

        for (index, (name, config)) in enabled.iter().enumerate() {
            if cancel.is_cancelled() {
                let _ = events.as_ref().map(|tx| tx.try_send(ReloadEvent::Cancelled));
                return ReloadOutcome {
                    state: ReloadState::Failed,
                    diff,
                    strategy,
                    per_server_errors,
                };
            }

            if let Err(e) = self.connections.connect_with_retry(name, config, cancel).await {
                warn!(server = name, error = %e, "full reload: per-server connect failed, continuing");
                per_server_errors.push((name.clone(), e.to_string()));
            }

            let progress = (((index + 1) * 100) / total) as u8;
            let _ = events.as_ref().map(|tx| tx.try_send(ReloadEvent::Progress(progress)));
        }

        let state = if !enabled.is_empty() && per_server_errors.len() == enabled.len() {
            error!("full reload: every server failed to reconnect, marking operation Failed");
            ReloadState::Failed
        } else {
            ReloadState::Completed
        };

        match &state {
            ReloadState::Completed => {
                let _ = events.as_ref().map(|tx| tx.try_send(ReloadEvent::Completed));
            }
            ReloadState::Failed => {
                let _ = events
                    .as_ref()
                    .map(|tx| tx.try_send(ReloadEvent::Failed("all servers failed to reconnect".to_string())));
            }
            _ => {}
        }

        ReloadOutcome {
            state,
            diff,
            strategy,
            per_server_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggmcp_config::ServerConfig;

    fn server(command: &str) -> ServerConfig {
        ServerConfig {
            command: Some(command.to_string()),
            ..Default::default()
        }
    }

    fn engine() -> ReloadEngine {
        let capabilities = Arc::new(CapabilityAggregator::new());
        let instructions = Arc::new(InstructionAggregator::new());
        ReloadEngine::new(
            Arc::new(ConnectionManager::new(
                "aggmcp",
                Duration::from_millis(5),
                Arc::clone(&capabilities),
                Arc::clone(&instructions),
            )),
            capabilities,
            instructions,
        )
    }

    #[tokio::test]
    async fn identical_configs_yield_completed_with_no_changes() {
        let engine = engine();
        let mut cfg = ValidatedConfig::new();
        cfg.insert("a".into(), server("echo"));
        let cancel = CancellationToken::new();
        let outcome = engine
            .execute_reload(&cfg, &cfg, ReloadOptions::default(), None, &cancel)
            .await;
        assert_eq!(outcome.state, ReloadState::Completed);
        assert!(outcome.diff.changes.is_empty());
    }

    #[tokio::test]
    async fn dry_run_produces_no_side_effects() {
        let engine = engine();
        let old = ValidatedConfig::new();
        let mut new = ValidatedConfig::new();
        new.insert("a".into(), server("echo"));
        let cancel = CancellationToken::new();
        let options = ReloadOptions {
            dry_run: true,
            ..Default::default()
        };
        let outcome = engine.execute_reload(&old, &new, options, None, &cancel).await;
        assert_eq!(outcome.state, ReloadState::Completed);
        assert!(engine.connections.snapshot("a").await.is_none());
    }

    #[tokio::test]
    async fn remove_server_clears_connection_and_capabilities() {
        let engine = engine();
        let mut old = ValidatedConfig::new();
        old.insert("a".into(), server("echo"));
        let new = ValidatedConfig::new();
        let cancel = CancellationToken::new();
        // Seed a connection record so removal has something to clear.
        engine.connections.connect_with_retry("a", old.get("a").unwrap(), &cancel).await.ok();
        let outcome = engine.execute_reload(&old, &new, ReloadOptions::default(), None, &cancel).await;
        assert_eq!(outcome.diff.impact.removed, 1);
        assert!(engine.connections.snapshot("a").await.is_none());
        let _ = outcome.state;
    }

    #[test]
    fn strategy_override_takes_precedence() {
        let diff = ConfigDiff::default();
        let options = ReloadOptions {
            strategy_override: Some(ReloadStrategy::Full),
            ..Default::default()
        };
        assert_eq!(ReloadEngine::choose_strategy(&diff, &options), ReloadStrategy::Full);
    }
}
