//! Inbox directory watcher.
//!
//! Every create/modify event for a file larger than the configured minimum
//! puts that file's path on the processing queue. The same path can be
//! queued many times; the processing loop copes with stale entries.

use crate::config::InboxConfig;
use crate::queue::ProcessingQueue;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Errors that prevent the inbox from being observed.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Inbox {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to watch inbox: {0}")]
    Notify(#[from] notify::Error),
}

/// Create the inbox and processed directories if configured to.
pub fn bootstrap_dirs(config: &InboxConfig) -> Result<(), WatchError> {
    if !config.create_if_missing {
        return Ok(());
    }

    let dirs = std::iter::once(&config.path).chain(config.processed_dir.as_ref());
    for dir in dirs {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|source| WatchError::CreateDir {
                path: dir.clone(),
                source,
            })?;
            info!(dir = %dir.display(), "Created directory");
        }
    }

    Ok(())
}

/// Filters inbox events and feeds candidate paths to the queue.
#[derive(Debug, Clone)]
pub struct IngestionWatcher {
    inbox: PathBuf,
    min_file_bytes: u64,
    queue: Arc<ProcessingQueue>,
}

/// Keeps the underlying OS watcher alive; dropping it stops observation.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    inbox: PathBuf,
}

impl WatchHandle {
    pub fn inbox(&self) -> &Path {
        &self.inbox
    }
}

impl IngestionWatcher {
    pub fn new(inbox: impl Into<PathBuf>, min_file_bytes: u64, queue: Arc<ProcessingQueue>) -> Self {
        Self {
            inbox: inbox.into(),
            min_file_bytes,
            queue,
        }
    }

    pub fn from_config(config: &InboxConfig, queue: Arc<ProcessingQueue>) -> Self {
        Self::new(config.path.clone(), config.min_file_bytes, queue)
    }

    /// Begin observing the inbox. Events are handled on notify's own thread.
    pub fn start(self) -> Result<WatchHandle, WatchError> {
        if !self.inbox.is_dir() {
            return Err(WatchError::NotADirectory(self.inbox.clone()));
        }

        let inbox = self.inbox.clone();
        let filter = self.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    filter.handle_event(&event);
                }
                Err(e) => {
                    warn!(error = %e, "filesystem watcher error");
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(&inbox, RecursiveMode::NonRecursive)?;

        info!(
            dir = %inbox.display(),
            min_file_bytes = self.min_file_bytes,
            "watching for photos"
        );

        Ok(WatchHandle {
            _watcher: watcher,
            inbox,
        })
    }

    /// Enqueue every qualifying path of one event. Returns how many were queued.
    pub fn handle_event(&self, event: &notify::Event) -> usize {
        if !is_relevant_event(event.kind) {
            trace!(kind = ?event.kind, "ignoring event");
            return 0;
        }

        let mut queued = 0;
        for path in &event.paths {
            if !self.is_candidate(path) {
                continue;
            }
            if self.queue.push(path.clone()) {
                queued += 1;
            }
        }
        queued
    }

    /// Whether `path` currently exists as a file strictly larger than the minimum.
    pub fn is_candidate(&self, path: &Path) -> bool {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() && meta.len() > self.min_file_bytes => true,
            Ok(meta) => {
                debug!(path = %path.display(), size = meta.len(), "skipping small or non-file entry");
                false
            }
            Err(_) => {
                debug!(path = %path.display(), "skipping vanished entry");
                false
            }
        }
    }
}

/// Returns `true` for events that may mean a photo was added or rewritten.
fn is_relevant_event(kind: EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}
