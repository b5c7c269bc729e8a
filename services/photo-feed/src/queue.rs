//! FIFO of inbox paths waiting to be processed.
//!
//! Written from the filesystem watcher's callback thread and drained by the
//! processing loop. Unbounded unless a capacity is configured, in which case
//! overflowing paths are refused rather than blocking the watcher.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Queue counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub rejected: u64,
    pub depth: usize,
}

#[derive(Debug, Default)]
pub struct ProcessingQueue {
    pending: Mutex<VecDeque<PathBuf>>,
    capacity: Option<usize>,
    enqueued: AtomicU64,
    rejected: AtomicU64,
}

impl ProcessingQueue {
    /// Unbounded queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue holding at most `capacity` paths when set.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Append a path. Returns `false` if a bounded queue is full.
    pub fn push(&self, path: PathBuf) -> bool {
        let mut pending = self.pending.lock();

        if let Some(cap) = self.capacity {
            if pending.len() >= cap {
                drop(pending);
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(path = %path.display(), capacity = cap, "Processing queue full, dropping path");
                metrics::counter!("photo_feed.queue.rejected").increment(1);
                return false;
            }
        }

        pending.push_back(path);
        let depth = pending.len();
        drop(pending);

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("photo_feed.queue.enqueued").increment(1);
        metrics::gauge!("photo_feed.queue.depth").set(depth as f64);
        true
    }

    /// Remove the oldest path.
    pub fn pop(&self) -> Option<PathBuf> {
        let mut pending = self.pending.lock();
        let path = pending.pop_front();
        metrics::gauge!("photo_feed.queue.depth").set(pending.len() as f64);
        path
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            depth: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let queue = ProcessingQueue::new();
        queue.push(PathBuf::from("a.jpg"));
        queue.push(PathBuf::from("b.jpg"));
        queue.push(PathBuf::from("a.jpg"));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(PathBuf::from("a.jpg")));
        assert_eq!(queue.pop(), Some(PathBuf::from("b.jpg")));
        assert_eq!(queue.pop(), Some(PathBuf::from("a.jpg")));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_bounded_queue_rejects_overflow() {
        let queue = ProcessingQueue::with_capacity(Some(2));
        assert!(queue.push(PathBuf::from("1.jpg")));
        assert!(queue.push(PathBuf::from("2.jpg")));
        assert!(!queue.push(PathBuf::from("3.jpg")));

        let stats = queue.stats();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.depth, 2);

        queue.pop();
        assert!(queue.push(PathBuf::from("3.jpg")));
    }

    #[test]
    fn test_producer_and_consumer_threads() {
        let queue = Arc::new(ProcessingQueue::new());

        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    queue.push(PathBuf::from(format!("{i}.jpg")));
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 1000 {
            match queue.pop() {
                Some(p) => seen.push(p),
                None => std::thread::yield_now(),
            }
        }
        producer.join().unwrap();

        let expected: Vec<PathBuf> = (0..1000).map(|i| PathBuf::from(format!("{i}.jpg"))).collect();
        assert_eq!(seen, expected);
        assert!(queue.is_empty());
    }
}
