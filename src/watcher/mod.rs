//! File watcher for resource-change notifications.
//!
//! Uses the `notify` crate to watch the served root. Changes are collected,
//! debounced, and turned into `notifications/resources/updated` for the
//! manifest URI of each changed file and every chunk URI of it that some
//! session is subscribed to.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::chunks::{encode_key, manifest_uri, ChunkEngine, CHUNK_URI_PREFIX};
use crate::error::{Error, Result};
use crate::mcp::subscriptions::SubscriptionManager;
use crate::metrics::Metrics;

/// File change event.
#[derive(Debug, Clone)]
pub struct FileChange {
    /// Path to the changed file
    pub path: PathBuf,
    /// Type of change
    pub kind: ChangeKind,
}

/// Type of file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// File watcher for monitoring the served root.
pub struct FileWatcher {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
    pending_changes: Arc<RwLock<Vec<FileChange>>>,
    debounce_ms: u64,
}

impl FileWatcher {
    /// Create a new file watcher.
    pub fn new(root: PathBuf, debounce_ms: u64) -> Self {
        Self {
            root,
            watcher: None,
            pending_changes: Arc::new(RwLock::new(Vec::new())),
            debounce_ms,
        }
    }

    /// Start watching for changes.
    pub async fn start(&mut self) -> Result<mpsc::Receiver<Vec<FileChange>>> {
        // notify calls back on its own thread; an unbounded send never blocks
        // or fails while the debouncer is alive.
        let (event_tx, event_rx) = mpsc::unbounded_channel::<FileChange>();
        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let kind = match event.kind {
                        notify::EventKind::Create(_) => ChangeKind::Created,
                        notify::EventKind::Modify(_) => ChangeKind::Modified,
                        notify::EventKind::Remove(_) => ChangeKind::Deleted,
                        _ => return,
                    };
                    for path in event.paths {
                        if event_tx.send(FileChange { path, kind }).is_err() {
                            debug!("Debouncer gone, dropping file change");
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("Watch error: {:?}", e);
                }
            },
            Config::default(),
        )
        .map_err(|e| Error::Internal(format!("Failed to create watcher: {}", e)))?;

        self.watcher = Some(watcher);

        if let Some(ref mut w) = self.watcher {
            w.watch(&self.root, RecursiveMode::Recursive)
                .map_err(|e| Error::Internal(format!("Failed to watch directory: {}", e)))?;
        }

        let rx = spawn_debouncer(event_rx, self.pending_changes.clone(), self.debounce_ms);
        info!("File watcher started for {:?}", self.root);
        Ok(rx)
    }

    /// Stop watching.
    pub fn stop(&mut self) {
        self.watcher = None;
        info!("File watcher stopped");
    }

    /// Get the number of pending changes.
    pub async fn pending_count(&self) -> usize {
        self.pending_changes.read().await.len()
    }
}

/// Buffer raw changes and flush them as one batch every `debounce_ms`.
/// When the event sender is dropped, whatever is pending is flushed and the
/// batch channel closes.
fn spawn_debouncer(
    mut events: mpsc::UnboundedReceiver<FileChange>,
    pending: Arc<RwLock<Vec<FileChange>>>,
    debounce_ms: u64,
) -> mpsc::Receiver<Vec<FileChange>> {
    let (tx, rx) = mpsc::channel::<Vec<FileChange>>(100);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(debounce_ms.max(1)));
        let mut open = true;
        while open {
            tokio::select! {
                change = events.recv() => match change {
                    Some(change) => {
                        pending.write().await.push(change);
                        continue;
                    }
                    None => open = false,
                },
                _ = ticker.tick() => {}
            }

            let changes: Vec<FileChange> = std::mem::take(&mut *pending.write().await);
            if !changes.is_empty() {
                debug!("Flushing {} file changes", changes.len());
                if tx.send(changes).await.is_err() {
                    break;
                }
            }
        }
    });
    rx
}

/// URIs affected by a batch of changes: each file's manifest plus its
/// currently subscribed chunk URIs. Sorted and deduplicated.
pub fn affected_uris(
    engine: &ChunkEngine,
    changes: &[FileChange],
    subscribed: &[String],
) -> Vec<String> {
    let mut uris = BTreeSet::new();
    for change in changes {
        let Some(key) = engine.key_for_path(&change.path) else {
            continue;
        };
        uris.insert(manifest_uri(&key));
        let chunk_prefix = format!("{}{}/", CHUNK_URI_PREFIX, encode_key(&key));
        uris.extend(
            subscribed
                .iter()
                .filter(|uri| uri.starts_with(&chunk_prefix))
                .cloned(),
        );
    }
    uris.into_iter().collect()
}

/// Forward watcher batches to subscribers until the watcher goes away.
pub fn spawn_notifier(
    mut changes: mpsc::Receiver<Vec<FileChange>>,
    engine: Arc<ChunkEngine>,
    subscriptions: Arc<SubscriptionManager>,
    metrics: Arc<Metrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(batch) = changes.recv().await {
            let subscribed = subscriptions.subscribed_uris().await;
            for uri in affected_uris(&engine, &batch, &subscribed) {
                let sent = subscriptions.notify(&uri).await;
                if sent > 0 {
                    debug!("Notified {} session(s) of {}", sent, uri);
                }
                metrics.add_notifications(sent as u64);
            }
        }
        debug!("Watcher channel closed");
    })
}
