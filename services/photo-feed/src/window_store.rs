//! Time-windowed record store.
//!
//! Records are appended with a visibility window `[insert_ts, delete_ts)` and
//! never rewritten or removed. The store answers one question about time:
//! which record is active as of a given logical instant.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};

/// A photo published into the feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Record {
    /// Sequence number in acceptance order
    pub id: i64,
    /// Logical millisecond at which the record becomes visible
    pub insert_ts: i64,
    /// Logical millisecond at which the record stops being visible
    pub delete_ts: i64,
    /// Label derived from the source file name
    pub comment: String,
    /// Base64-encoded JPEG
    #[serde(rename = "photo")]
    #[sqlx(rename = "photo")]
    pub payload: String,
}

impl Record {
    /// Whether `now` falls inside the half-open window `[insert_ts, delete_ts)`.
    pub fn is_visible_at(&self, now: i64) -> bool {
        self.insert_ts <= now && now < self.delete_ts
    }
}

/// Errors reported by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("TTL must be greater than zero and keep delete_ts in range")]
    InvalidTtl,

    #[error("Insert affected {actual} rows (expected {expected})")]
    RowCount { expected: u64, actual: u64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Append-only store with a point-in-time "active record" view.
#[async_trait]
pub trait TimeWindowedStore: Send + Sync {
    /// Append a record visible over `[now, now + ttl)` and return its id.
    async fn insert(
        &self,
        comment: &str,
        payload: &str,
        now: i64,
        ttl: Duration,
    ) -> Result<i64, StoreError>;

    /// Rows of the "visible as of now" view. Backends promise at most one row.
    async fn active_view(&self, now: i64) -> Result<Vec<Record>, StoreError>;

    /// Number of records whose window contains `now`.
    async fn visible_count(&self, now: i64) -> Result<u64, StoreError>;

    /// The active record at `now`, if any.
    ///
    /// More than one row from [`active_view`](Self::active_view) breaks the
    /// backend's contract. That is logged and the first row is still returned.
    #[instrument(skip(self))]
    async fn active_record(&self, now: i64) -> Result<Option<Record>, StoreError> {
        let rows = self.active_view(now).await?;

        if rows.len() > 1 {
            error!(rows = rows.len(), now, "expected at most 1 active row");
            metrics::counter!("photo_feed.api.read_anomalies").increment(1);
        }

        Ok(rows.into_iter().next())
    }
}

/// Pick the active record at `now`: earliest `insert_ts`, then lowest `id`.
pub fn select_active(records: &[Record], now: i64) -> Option<&Record> {
    records
        .iter()
        .filter(|r| r.is_visible_at(now))
        .min_by_key(|r| (r.insert_ts, r.id))
}

/// Convert a TTL to whole milliseconds, rejecting zero.
pub(crate) fn ttl_millis(ttl: Duration) -> Result<i64, StoreError> {
    let ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    if ms <= 0 {
        return Err(StoreError::InvalidTtl);
    }
    Ok(ms)
}

/// `now + ttl_ms`, rejecting windows whose end does not fit in an `i64`.
pub(crate) fn window_end(now: i64, ttl_ms: i64) -> Result<i64, StoreError> {
    now.checked_add(ttl_ms).ok_or(StoreError::InvalidTtl)
}

/// Process-local store backed by an append-only vector.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Copy of every stored record in acceptance order.
    pub fn snapshot(&self) -> Vec<Record> {
        self.records.read().clone()
    }
}

#[async_trait]
impl TimeWindowedStore for MemoryStore {
    async fn insert(
        &self,
        comment: &str,
        payload: &str,
        now: i64,
        ttl: Duration,
    ) -> Result<i64, StoreError> {
        let ttl_ms = ttl_millis(ttl)?;
        let delete_ts = window_end(now, ttl_ms)?;

        // id allocation and append share one critical section
        let mut records = self.records.write();
        let id = records.last().map_or(1, |r| r.id + 1);
        records.push(Record {
            id,
            insert_ts: now,
            delete_ts,
            comment: comment.to_string(),
            payload: payload.to_string(),
        });

        debug!(id, insert_ts = now, ttl_ms, "record appended");
        Ok(id)
    }

    async fn active_view(&self, now: i64) -> Result<Vec<Record>, StoreError> {
        let records = self.records.read();
        Ok(select_active(&records, now).cloned().into_iter().collect())
    }

    async fn visible_count(&self, now: i64) -> Result<u64, StoreError> {
        let records = self.records.read();
        Ok(records.iter().filter(|r| r.is_visible_at(now)).count() as u64)
    }
}
