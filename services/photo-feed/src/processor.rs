//! Serial consumer that turns queued inbox paths into feed records.

use crate::clock::Clock;
use crate::queue::ProcessingQueue;
use crate::transform::{transform_file_blocking, TransformSettings};
use crate::window_store::TimeWindowedStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// What happened to one queued path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Inserted with this record id
    Published(i64),
    /// File vanished before it could be read
    Skipped,
    /// File could not be decoded or resized; dropped
    TransformFailed,
    /// Store rejected the insert; dropped
    StoreFailed,
}

/// Processing counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorStats {
    pub published: u64,
    pub skipped: u64,
    pub transform_failed: u64,
    pub store_failed: u64,
}

/// Loop settings.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub ttl: Duration,
    pub idle_interval: Duration,
    pub transform: TransformSettings,
    /// Move published files here when set
    pub processed_dir: Option<PathBuf>,
}

/// Drains the processing queue one path at a time.
pub struct ProcessingLoop {
    queue: Arc<ProcessingQueue>,
    store: Arc<dyn TimeWindowedStore>,
    clock: Arc<dyn Clock>,
    settings: ProcessorSettings,
    stats: parking_lot::Mutex<ProcessorStats>,
}

impl ProcessingLoop {
    pub fn new(
        queue: Arc<ProcessingQueue>,
        store: Arc<dyn TimeWindowedStore>,
        clock: Arc<dyn Clock>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            queue,
            store,
            clock,
            settings,
            stats: parking_lot::Mutex::new(ProcessorStats::default()),
        }
    }

    pub fn stats(&self) -> ProcessorStats {
        *self.stats.lock()
    }

    /// Run until `cancel` fires. Idles for the configured interval whenever
    /// the queue is empty.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            ttl_ms = self.settings.ttl.as_millis() as u64,
            idle_interval_ms = self.settings.idle_interval.as_millis() as u64,
            "Processing loop started"
        );

        while !cancel.is_cancelled() {
            self.drain(&cancel).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.idle_interval) => {}
            }
        }

        info!(stats = ?self.stats(), "Processing loop stopped");
    }

    /// Process everything currently queued. Returns the number of paths handled.
    pub async fn drain(&self, cancel: &CancellationToken) -> usize {
        let mut handled = 0;
        while !cancel.is_cancelled() {
            let Some(path) = self.queue.pop() else {
                break;
            };
            self.process_one(&path).await;
            handled += 1;
        }
        handled
    }

    /// Transform one file and publish it. Never returns an error: every
    /// failure is logged and the path is dropped.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn process_one(&self, path: &Path) -> ProcessOutcome {
        debug!("processing photo");

        let transformed =
            match transform_file_blocking(path.to_path_buf(), self.settings.transform).await {
                Ok(t) => t,
                Err(e) if e.is_not_found() => {
                    debug!("photo vanished before processing, skipping");
                    self.stats.lock().skipped += 1;
                    return ProcessOutcome::Skipped;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to transform photo, dropping it");
                    self.stats.lock().transform_failed += 1;
                    metrics::counter!("photo_feed.photos.transform_failed").increment(1);
                    return ProcessOutcome::TransformFailed;
                }
            };

        let now = self.clock.now_ms();
        let id = match self
            .store
            .insert(&transformed.comment, &transformed.payload, now, self.settings.ttl)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "Failed to insert photo, dropping it");
                self.stats.lock().store_failed += 1;
                metrics::counter!("photo_feed.photos.insert_failed").increment(1);
                return ProcessOutcome::StoreFailed;
            }
        };

        self.stats.lock().published += 1;
        metrics::counter!("photo_feed.photos.inserted").increment(1);
        info!(
            id,
            insert_ts = now,
            comment = %transformed.comment,
            size = format!("{}x{}", transformed.width, transformed.height),
            "Photo published"
        );

        if let Some(ref dir) = self.settings.processed_dir {
            move_to(path, dir).await;
        }

        ProcessOutcome::Published(id)
    }
}

async fn move_to(path: &Path, dir: &Path) {
    let Some(name) = path.file_name() else {
        return;
    };
    let target = dir.join(name);
    if let Err(e) = tokio::fs::rename(path, &target).await {
        warn!(error = %e, target = %target.display(), "Failed to move processed photo");
    }
}
