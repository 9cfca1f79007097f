//! Config Watcher: watches the config file's parent directory so the watch
//! survives editors that write via rename, debounces bursts of events, and
//! emits a single notification per settled change. This module only
//! detects *that* something changed; reading, parsing and diffing are the
//! Loader's and Change Analyzer's jobs, kept separate so they stay pure and
//! testable.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long to wait after the last filesystem event before firing a
/// reload notification.
const DEBOUNCE: Duration = Duration::from_millis(500);
const TICK: Duration = Duration::from_millis(50);

/// Watches a single config file for create/modify events, debounced, and
/// signals the caller over an mpsc channel. Dropping the `ConfigWatcher`
/// stops the watch and the debounce task.
pub struct ConfigWatcher {
    _watcher: StdMutex<Option<RecommendedWatcher>>,
    _task: tokio::task::JoinHandle<()>,
}

impl ConfigWatcher {
    /// Start watching `config_path`. Returns the watcher (keep it alive for
    /// as long as you want the watch to run) and a receiver that yields
    /// `()` once per debounced settle.
    pub fn start(config_path: PathBuf) -> notify::Result<(Self, mpsc::Receiver<()>)> {
        let (raw_tx, raw_rx) = mpsc::channel::<()>(32);
        let (settled_tx, settled_rx) = mpsc::channel::<()>(8);

        let watch_dir = config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let watched_file = config_path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let relevant = result
                    .as_ref()
                    .is_ok_and(|event| is_relevant_event(event, &watched_file));
                if relevant {
                    let _ = raw_tx.try_send(());
                }
            },
            notify::Config::default(),
        )?;

        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;
        info!(path = %config_path.display(), "watching config file for changes");

        let task = tokio::spawn(debounce_loop(raw_rx, settled_tx));

        Ok((
            Self {
                _watcher: StdMutex::new(Some(watcher)),
                _task: task,
            },
            settled_rx,
        ))
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self._task.abort();
    }
}

fn is_relevant_event(event: &Event, watched_file: &Path) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
        && event.paths.iter().any(|p| p == watched_file)
}

async fn debounce_loop(mut raw_rx: mpsc::Receiver<()>, settled_tx: mpsc::Sender<()>) {
    let mut last_event: Option<Instant> = None;
    let mut pending = false;
    let mut ticker = tokio::time::interval(TICK);

    loop {
        tokio::select! {
            maybe = raw_rx.recv() => {
                match maybe {
                    Some(()) => {
                        debug!("config file event observed, debouncing");
                        last_event = Some(Instant::now());
                        pending = true;
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if pending && last_event.is_some_and(|t| t.elapsed() >= DEBOUNCE) {
                    pending = false;
                    last_event = None;
                    if settled_tx.send(()).await.is_err() {
                        warn!("config watcher receiver dropped, stopping watch");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn fires_once_after_a_burst_of_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(&path, "{}").unwrap();

        let (_watcher, mut rx) = ConfigWatcher::start(path.clone()).unwrap();

        for i in 0..5 {
            let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            write!(f, "{{\"n\":{i}}}").unwrap();
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }

        let result = tokio::time::timeout(StdDuration::from_secs(2), rx.recv()).await;
        assert!(result.is_ok(), "expected a debounced notification");
        assert!(result.unwrap().is_some());
    }

    #[tokio::test]
    async fn unrelated_file_in_same_directory_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(&path, "{}").unwrap();
        let other = dir.path().join("unrelated.txt");

        let (_watcher, mut rx) = ConfigWatcher::start(path).unwrap();
        std::fs::write(&other, "noise").unwrap();

        let result = tokio::time::timeout(StdDuration::from_millis(500), rx.recv()).await;
        assert!(result.is_err(), "unrelated file write should not trigger a notification");
    }
}
