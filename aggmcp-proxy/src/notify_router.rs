//! Notification Router: forwards list-changed/logging notifications
//! outbound→inbound (batched) and logging-level/cancellation events
//! inbound→outbound (broadcast, tolerating per-connection errors).
//!
//! The concrete inbound wire connection is left as an external
//! collaborator, so this module only depends on the [`InboundSink`] trait
//! the core needs from it — send one notification, or report that the
//! session disconnected.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rmcp::model::LoggingLevel;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::capabilities::CapabilityChangeSet;

const DEFAULT_BATCH_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub enum OutboundNotification {
    ToolsListChanged,
    ResourcesListChanged,
    PromptsListChanged,
    Logging { level: LoggingLevel, logger: Option<String>, data: serde_json::Value },
}

/// What the router needs from an inbound wire connection. A real
/// implementation forwards these over whatever the provided codec gives it
/// (stdio write, HTTP SSE push, ...); sending to a disconnected session is
/// simply reported back as `false` so the router can log-and-continue
/// rather than treat it as an error.
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn send(&self, notification: OutboundNotification) -> bool;
}

/// What the router needs from an outbound connection to broadcast
/// inbound-originated events (logging level changes, cancellations).
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn set_logging_level(&self, level: LoggingLevel) -> Result<(), String>;
    async fn cancel(&self, request_id: String) -> Result<(), String>;
}

struct PendingBatch {
    kinds: Vec<OutboundNotification>,
}

/// Coalesces per-session notification bursts into one flush per
/// `batchDelayMs` window: multiple changes arriving within the window
/// collapse to a single outbound notification.
pub struct NotificationRouter {
    batch_delay: Duration,
    inbound: DashMap<String, Arc<dyn InboundSink>>,
    outbound: DashMap<String, Arc<dyn OutboundSink>>,
    pending: DashMap<String, Arc<Mutex<PendingBatch>>>,
}

impl NotificationRouter {
    pub fn new(batch_delay: Duration) -> Self {
        Self {
            batch_delay,
            inbound: DashMap::new(),
            outbound: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    pub fn with_default_batch_delay() -> Self {
        Self::new(DEFAULT_BATCH_DELAY)
    }

    pub fn register_inbound(&self, session_id: &str, sink: Arc<dyn InboundSink>) {
        self.inbound.insert(session_id.to_string(), sink);
    }

    pub fn unregister_inbound(&self, session_id: &str) {
        self.inbound.remove(session_id);
        self.pending.remove(session_id);
    }

    pub fn register_outbound(&self, server_name: &str, sink: Arc<dyn OutboundSink>) {
        self.outbound.insert(server_name.to_string(), sink);
    }

    pub fn unregister_outbound(&self, server_name: &str) {
        self.outbound.remove(server_name);
    }

    /// Translate a capability change set into the notifications affected
    /// sessions should see, then route them batched: `listChanged`
    /// notifications emitted within a `batchDelayMs` window collapse into
    /// one flush.
    pub async fn notify_capability_change(&self, change: &CapabilityChangeSet, session_ids: &[String]) {
        if change.is_empty() {
            return;
        }
        let mut kinds = Vec::new();
        if !change.tools_added.is_empty() || !change.tools_removed.is_empty() {
            kinds.push(OutboundNotification::ToolsListChanged);
        }
        if !change.resources_added.is_empty() || !change.resources_removed.is_empty() {
            kinds.push(OutboundNotification::ResourcesListChanged);
        }
        if !change.prompts_added.is_empty() || !change.prompts_removed.is_empty() {
            kinds.push(OutboundNotification::PromptsListChanged);
        }
        for session_id in session_ids {
            for kind in &kinds {
                self.queue(session_id, kind.clone()).await;
            }
        }
    }

    pub async fn notify_logging(&self, session_ids: &[String], level: LoggingLevel, logger: Option<String>, data: serde_json::Value) {
        for session_id in session_ids {
            self.queue(
                session_id,
                OutboundNotification::Logging {
                    level,
                    logger: logger.clone(),
                    data: data.clone(),
                },
            )
            .await;
        }
    }

    async fn queue(&self, session_id: &str, notification: OutboundNotification) {
        let batch = self
            .pending
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PendingBatch { kinds: Vec::new() })))
            .clone();

        let is_first = {
            let mut guard = batch.lock().await;
            let was_empty = guard.kinds.is_empty();
            guard.kinds.push(notification);
            was_empty
        };

        if is_first {
            let session_id = session_id.to_string();
            let delay = self.batch_delay;
            let inbound = self.inbound.get(&session_id).map(|s| s.clone());
            let batch = batch.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let kinds = {
                    let mut guard = batch.lock().await;
                    std::mem::take(&mut guard.kinds)
                };
                match inbound {
                    Some(sink) => {
                        for notification in dedup(kinds) {
                            if !sink.send(notification).await {
                                debug!(session_id, "inbound session disconnected, dropping notification");
                                break;
                            }
                        }
                    }
                    None => debug!(session_id, "no inbound sink registered, dropping batched notifications"),
                }
            });
        }
    }

    /// Inbound → Outbound: broadcast a logging-level change to every
    /// connected outbound, tolerating per-connection errors.
    pub async fn broadcast_logging_level(&self, level: LoggingLevel) -> BTreeMap<String, String> {
        let mut errors = BTreeMap::new();
        for entry in self.outbound.iter() {
            if let Err(e) = entry.value().set_logging_level(level).await {
                errors.insert(entry.key().clone(), e);
            }
        }
        errors
    }

    pub async fn broadcast_cancel(&self, request_id: &str) -> BTreeMap<String, String> {
        let mut errors = BTreeMap::new();
        for entry in self.outbound.iter() {
            if let Err(e) = entry.value().cancel(request_id.to_string()).await {
                errors.insert(entry.key().clone(), e);
            }
        }
        errors
    }
}

/// Collapse consecutive duplicate listChanged kinds without reordering;
/// `Logging` entries are never deduplicated since each carries its own
/// payload.
fn dedup(kinds: Vec<OutboundNotification>) -> Vec<OutboundNotification> {
    let mut out: Vec<OutboundNotification> = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let duplicate = matches!(
            (out.last(), &kind),
            (Some(OutboundNotification::ToolsListChanged), OutboundNotification::ToolsListChanged)
                | (Some(OutboundNotification::ResourcesListChanged), OutboundNotification::ResourcesListChanged)
                | (Some(OutboundNotification::PromptsListChanged), OutboundNotification::PromptsListChanged)
        );
        if !duplicate {
            out.push(kind);
        }
    }
    out
}

/// A test-only in-memory channel sink, used both in this module's tests and
/// available to callers wiring up harnesses elsewhere.
pub struct ChannelInboundSink(pub mpsc::UnboundedSender<OutboundNotification>);

#[async_trait]
impl InboundSink for ChannelInboundSink {
    async fn send(&self, notification: OutboundNotification) -> bool {
        self.0.send(notification).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingOutbound {
        fail: bool,
    }

    #[async_trait]
    impl OutboundSink for RecordingOutbound {
        async fn set_logging_level(&self, _level: LoggingLevel) -> Result<(), String> {
            if self.fail {
                Err("boom".to_string())
            } else {
                Ok(())
            }
        }
        async fn cancel(&self, _request_id: String) -> Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn batches_multiple_changes_into_one_flush() {
        let router = NotificationRouter::new(Duration::from_millis(20));
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.register_inbound("s1", Arc::new(ChannelInboundSink(tx)));

        let change = CapabilityChangeSet {
            tools_added: vec!["a".to_string()],
            ..Default::default()
        };
        router.notify_capability_change(&change, &["s1".to_string()]).await;
        router.notify_capability_change(&change, &["s1".to_string()]).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        let mut received = Vec::new();
        while let Ok(n) = rx.try_recv() {
            received.push(n);
        }
        assert_eq!(received.len(), 1, "duplicate ToolsListChanged should collapse");
    }

    #[tokio::test]
    async fn sending_to_unregistered_session_is_a_silent_no_op() {
        let router = NotificationRouter::new(Duration::from_millis(5));
        let change = CapabilityChangeSet {
            tools_added: vec!["a".to_string()],
            ..Default::default()
        };
        router.notify_capability_change(&change, &["ghost".to_string()]).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn broadcast_logging_level_collects_per_connection_errors() {
        let router = NotificationRouter::with_default_batch_delay();
        router.register_outbound("ok", Arc::new(RecordingOutbound { fail: false }));
        router.register_outbound("bad", Arc::new(RecordingOutbound { fail: true }));
        let errors = router.broadcast_logging_level(LoggingLevel::Info).await;
        assert_eq!(errors.len(), 1);
        assert!(errors.contains_key("bad"));
    }

    #[test]
    fn empty_change_set_is_never_queued() {
        let change = CapabilityChangeSet::default();
        assert!(change.is_empty());
    }
}
