//! Photo Feed Service
//!
//! Turns a directory of dropped photos into an ephemeral, one-at-a-time feed.
//! Each photo that lands in the inbox is downsized, stored with a fixed
//! time-to-live, and becomes the feed's active item while its window is open.
//! Pollers read the active item over HTTP and notice changes by id.
//!
//! ## Features
//!
//! - **Inbox Watching**: filesystem events filtered by a minimum file size
//! - **Serial Processing**: one photo resized and published at a time
//! - **Windowed Store**: append-only records visible over `[insert_ts, delete_ts)`,
//!   in memory or in PostgreSQL
//! - **Feed API**: `GET /next_photo` returns the active record or `{}`
//!
//! ## Architecture
//!
//! ```text
//!   inbox/               ┌──────────────┐        ┌──────────────┐
//! ┌──────────────┐ events│ Ingestion    │  push  │ Processing   │
//! │ *.jpg *.png  │──────▶│ Watcher      │───────▶│ Queue        │
//! └──────────────┘       └──────────────┘        └──────────────┘
//!                                                       │ pop
//!                                                       ▼
//! ┌──────────────┐ insert┌──────────────┐ resize ┌──────────────┐
//! │ TimeWindowed │◀──────│ Processing   │───────▶│ Transform    │
//! │ Store        │       │ Loop         │        └──────────────┘
//! └──────────────┘       └──────────────┘
//!        │ active_record(now)
//!        ▼
//! ┌──────────────┐  GET /next_photo   ┌──────────────┐
//! │ Feed API     │◀───────────────────│ Pollers      │
//! └──────────────┘                    └──────────────┘
//! ```

pub mod api;
pub mod client;
pub mod clock;
pub mod config;
pub mod pg_store;
pub mod processor;
pub mod queue;
pub mod transform;
pub mod watcher;
pub mod window_store;

pub use api::{create_router, AppState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use pg_store::PgStore;
pub use processor::{ProcessOutcome, ProcessingLoop, ProcessorSettings};
pub use queue::ProcessingQueue;
pub use transform::{TransformError, TransformSettings, Transformed};
pub use watcher::{IngestionWatcher, WatchError, WatchHandle};
pub use window_store::{select_active, MemoryStore, Record, StoreError, TimeWindowedStore};
