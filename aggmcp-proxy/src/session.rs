//! Inbound Session Store: dual-trigger persistence over the atomic
//! `FileSystem` abstraction from `aggmcp-common`, the same write
//! discipline every on-disk document in this system uses.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aggmcp_common::fs_utils::{FilePermissions, FileSystem};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

const DEFAULT_PERSIST_REQUESTS: u64 = 100;
const DEFAULT_PERSIST_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_BACKGROUND_FLUSH: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagFilterMode {
    SimpleOr,
    SimpleAnd,
    Advanced,
    Preset,
}

/// One inbound session record. `tag_expression`/`tag_query` are kept as
/// canonical JSON strings on disk; malformed values are tolerated at load
/// time rather than refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub tags: Option<Vec<String>>,
    pub tag_expression_json: Option<String>,
    pub tag_query_json: Option<String>,
    pub tag_filter_mode: TagFilterMode,
    pub preset_name: Option<String>,
    pub enable_pagination: bool,
    pub custom_template: Option<String>,
    pub expires_millis: i64,
    pub created_at_millis: i64,
    pub last_accessed_at_millis: i64,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, ttl: Duration) -> Self {
        let now = now_millis();
        Self {
            session_id: session_id.into(),
            tags: None,
            tag_expression_json: None,
            tag_query_json: None,
            tag_filter_mode: TagFilterMode::SimpleOr,
            preset_name: None,
            enable_pagination: false,
            custom_template: None,
            expires_millis: now + ttl.as_millis() as i64,
            created_at_millis: now,
            last_accessed_at_millis: now,
        }
    }

    pub fn touch(&mut self, ttl: Duration) {
        self.last_accessed_at_millis = now_millis();
        self.expires_millis = self.last_accessed_at_millis + ttl.as_millis() as i64;
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_millis
    }
}

struct Tracked {
    record: SessionRecord,
    request_count: u64,
    last_persist_at_millis: i64,
    dirty: bool,
}

/// `persistence_enabled` flag: when off, disk I/O is skipped and sessions
/// are memory-only.
#[derive(Debug, Clone, Copy)]
pub struct SessionStoreConfig {
    pub persistence_enabled: bool,
    pub persist_requests: u64,
    pub persist_interval: Duration,
    pub ttl: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            persistence_enabled: true,
            persist_requests: DEFAULT_PERSIST_REQUESTS,
            persist_interval: DEFAULT_PERSIST_INTERVAL,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

pub struct SessionStore {
    fs: Arc<dyn FileSystem>,
    dir: std::path::PathBuf,
    config: SessionStoreConfig,
    sessions: RwLock<HashMap<String, Tracked>>,
}

impl SessionStore {
    pub fn new(fs: Arc<dyn FileSystem>, dir: std::path::PathBuf, config: SessionStoreConfig) -> Self {
        Self {
            fs,
            dir,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn path_for(&self, session_id: &str) -> std::path::PathBuf {
        self.dir.join(format!("sess-{session_id}.json"))
    }

    /// Create (or return the existing) record for `session_id`.
    pub fn get_or_create(&self, session_id: &str) -> SessionRecord {
        let mut sessions = self.sessions.write().expect("session store lock poisoned");
        if let Some(tracked) = sessions.get_mut(session_id) {
            if tracked.record.is_expired(now_millis()) {
                sessions.remove(session_id);
            } else {
                tracked.record.touch(self.config.ttl);
                tracked.request_count += 1;
                tracked.dirty = true;
                let record = tracked.record.clone();
                drop(sessions);
                self.maybe_persist(session_id);
                return record;
            }
        }

        let record = SessionRecord::new(session_id, self.config.ttl);
        sessions.insert(
            session_id.to_string(),
            Tracked {
                record: record.clone(),
                request_count: 1,
                last_persist_at_millis: now_millis(),
                dirty: true,
            },
        );
        drop(sessions);
        self.maybe_persist(session_id);
        record
    }

    /// Lookup without creating; expired sessions are evicted and return
    /// `None`.
    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        let mut sessions = self.sessions.write().expect("session store lock poisoned");
        match sessions.get(session_id) {
            Some(tracked) if tracked.record.is_expired(now_millis()) => {
                sessions.remove(session_id);
                None
            }
            Some(tracked) => Some(tracked.record.clone()),
            None => None,
        }
    }

    pub fn update(&self, session_id: &str, f: impl FnOnce(&mut SessionRecord)) {
        let mut sessions = self.sessions.write().expect("session store lock poisoned");
        if let Some(tracked) = sessions.get_mut(session_id) {
            f(&mut tracked.record);
            tracked.dirty = true;
        }
        drop(sessions);
        self.maybe_persist(session_id);
    }

    /// Dual-trigger persist: write through when either
    /// `requestCount >= persistRequests` or the interval elapsed,
    /// whichever first; both counters reset on persist.
    fn maybe_persist(&self, session_id: &str) {
        if !self.config.persistence_enabled {
            return;
        }

        let now = now_millis();
        let should_persist = {
            let sessions = self.sessions.read().expect("session store lock poisoned");
            match sessions.get(session_id) {
                Some(tracked) => {
                    tracked.dirty
                        && (tracked.request_count >= self.config.persist_requests
                            || now - tracked.last_persist_at_millis
                                >= self.config.persist_interval.as_millis() as i64)
                }
                None => false,
            }
        };

        if should_persist {
            self.persist_one(session_id, now);
        }
    }

    fn persist_one(&self, session_id: &str, now: i64) {
        let record = {
            let mut sessions = self.sessions.write().expect("session store lock poisoned");
            let Some(tracked) = sessions.get_mut(session_id) else {
                return;
            };
            tracked.request_count = 0;
            tracked.last_persist_at_millis = now;
            tracked.dirty = false;
            tracked.record.clone()
        };

        let path = self.path_for(session_id);
        match serde_json::to_string_pretty(&record) {
            Ok(json) => {
                if let Err(e) = self.fs.write_atomic(&path, &json, FilePermissions::Standard) {
                    warn!(session_id, error = %e, "failed to persist session");
                }
            }
            Err(e) => warn!(session_id, error = %e, "failed to serialize session"),
        }
    }

    /// Background flush: write every dirty session regardless of its
    /// individual trigger state.
    pub fn flush_all(&self) {
        if !self.config.persistence_enabled {
            return;
        }
        let dirty_ids: Vec<String> = {
            let sessions = self.sessions.read().expect("session store lock poisoned");
            sessions
                .iter()
                .filter(|(_, t)| t.dirty)
                .map(|(id, _)| id.clone())
                .collect()
        };
        let now = now_millis();
        for id in dirty_ids {
            self.persist_one(&id, now);
        }
    }

    /// Evict every expired session from memory (periodic sweep).
    pub fn sweep_expired(&self) -> usize {
        let now = now_millis();
        let mut sessions = self.sessions.write().expect("session store lock poisoned");
        let before = sessions.len();
        sessions.retain(|_, tracked| !tracked.record.is_expired(now));
        before - sessions.len()
    }

    /// Flush everything dirty. Cancelling any background-flush task is the
    /// caller's responsibility (it owns the `JoinHandle`).
    pub fn stop(&self) {
        self.flush_all();
    }

    /// Periodic flush task: wakes every [`DEFAULT_BACKGROUND_FLUSH`] and
    /// writes through whatever is dirty, independent of each session's own
    /// dual-trigger state.
    pub fn spawn_background_flush(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(DEFAULT_BACKGROUND_FLUSH) => {
                        store.flush_all();
                        store.sweep_expired();
                    }
                    _ = cancel.cancelled() => {
                        store.flush_all();
                        return;
                    }
                }
            }
        })
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the unix epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggmcp_common::fs_utils::RealFileSystem;
    use tempfile::tempdir;

    fn store(config: SessionStoreConfig) -> (SessionStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(Arc::new(RealFileSystem), dir.path().to_path_buf(), config);
        (store, dir)
    }

    #[test]
    fn get_or_create_is_idempotent_for_same_id() {
        let (store, _dir) = store(SessionStoreConfig::default());
        let first = store.get_or_create("s1");
        let second = store.get_or_create("s1");
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.created_at_millis, second.created_at_millis);
    }

    #[test]
    fn persists_after_request_count_threshold() {
        let (store, dir) = store(SessionStoreConfig {
            persist_requests: 3,
            persist_interval: Duration::from_secs(3600),
            ..SessionStoreConfig::default()
        });
        store.get_or_create("s1");
        store.get_or_create("s1");
        assert!(!dir.path().join("sess-s1.json").exists());
        store.get_or_create("s1");
        assert!(dir.path().join("sess-s1.json").exists());
    }

    #[test]
    fn disabled_persistence_never_writes_to_disk() {
        let (store, dir) = store(SessionStoreConfig {
            persistence_enabled: false,
            persist_requests: 1,
            ..SessionStoreConfig::default()
        });
        store.get_or_create("s1");
        store.flush_all();
        assert!(dir.path().join("sess-s1.json").exists().eq(&false));
    }

    #[test]
    fn expired_session_is_evicted_on_next_lookup() {
        let (store, _dir) = store(SessionStoreConfig {
            ttl: Duration::from_millis(0),
            ..SessionStoreConfig::default()
        });
        store.get_or_create("s1");
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.get("s1").is_none());
    }

    #[test]
    fn flush_all_persists_every_dirty_session() {
        let (store, dir) = store(SessionStoreConfig {
            persist_requests: u64::MAX,
            persist_interval: Duration::from_secs(3600),
            ..SessionStoreConfig::default()
        });
        store.get_or_create("s1");
        store.get_or_create("s2");
        store.flush_all();
        assert!(dir.path().join("sess-s1.json").exists());
        assert!(dir.path().join("sess-s2.json").exists());
    }

    #[test]
    fn sweep_expired_removes_stale_entries_from_memory() {
        let (store, _dir) = store(SessionStoreConfig {
            ttl: Duration::from_millis(0),
            ..SessionStoreConfig::default()
        });
        store.get_or_create("s1");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.sweep_expired(), 1);
    }
}
