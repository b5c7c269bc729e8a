//! Polling client for the feed API.
//!
//! Pollers fetch `/next_photo` on a fixed interval, treat `id` (or
//! `insert_ts` when `id` is absent) as the change key and derive the time
//! left from `delete_ts`.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// One `/next_photo` response. All fields are absent when nothing is active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FeedItem {
    pub id: Option<i64>,
    pub insert_ts: Option<i64>,
    pub delete_ts: Option<i64>,
    pub comment: Option<String>,
    pub photo: Option<String>,
}

impl FeedItem {
    /// Identity used for change detection.
    pub fn key(&self) -> Option<i64> {
        self.id.or(self.insert_ts)
    }

    pub fn is_empty(&self) -> bool {
        self.photo.is_none()
    }

    /// Milliseconds until this item expires, as seen at `now`.
    pub fn remaining_ms(&self, now: i64) -> Option<i64> {
        self.delete_ts.map(|d| time_remaining_ms(d, now))
    }
}

/// `delete_ts - now`, floored at zero.
pub fn time_remaining_ms(delete_ts: i64, now: i64) -> i64 {
    delete_ts.saturating_sub(now).max(0)
}

/// Tracks the last seen key and reports when it changes.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last: Option<i64>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `item`; `true` if its key differs from the previous one.
    /// Going from a photo to nothing (and back) counts as a change.
    pub fn observe(&mut self, item: &FeedItem) -> bool {
        let key = item.key();
        let changed = key != self.last;
        self.last = key;
        changed
    }
}

pub struct FeedPoller {
    client: reqwest::Client,
    url: String,
}

impl FeedPoller {
    /// `base_url` is the API root, e.g. `http://localhost:3001`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/next_photo", base_url.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> Result<FeedItem, ClientError> {
        let item = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<FeedItem>()
            .await?;
        Ok(item)
    }
}
