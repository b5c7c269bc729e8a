use crate::clock::Clock;
use crate::config::ApiConfig;
use crate::window_store::TimeWindowedStore;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TimeWindowedStore>,
    pub clock: Arc<dyn Clock>,
}

/// Visible photo count response
#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET])
            .allow_headers(Any);
        if config.cors_origins.is_empty() {
            cors.allow_origin(Any)
        } else {
            let origins: Vec<HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            cors.allow_origin(origins)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/next_photo", get(next_photo))
        .route("/photos_count", get(photos_count))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "photo-feed"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.visible_count(state.clock.now_ms()).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "store": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// The active photo, or `{}` when nothing is visible.
///
/// Read failures are logged and answered like an empty feed; pollers
/// only ever see "something" or "nothing".
#[instrument(skip(state))]
async fn next_photo(State(state): State<AppState>) -> Json<serde_json::Value> {
    let now = state.clock.now_ms();

    let body = match state.store.active_record(now).await {
        Ok(Some(record)) => serde_json::to_value(record).unwrap_or_else(|e| {
            error!(error = %e, "Failed to serialize photo");
            serde_json::json!({})
        }),
        Ok(None) => serde_json::json!({}),
        Err(e) => {
            error!(error = %e, "Failed to query active photo");
            serde_json::json!({})
        }
    };

    Json(body)
}

/// Number of photos currently inside their window
#[instrument(skip(state))]
async fn photos_count(
    State(state): State<AppState>,
) -> Result<Json<CountResponse>, (StatusCode, Json<serde_json::Value>)> {
    let count = state
        .store
        .visible_count(state.clock.now_ms())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to count visible photos");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "Failed to count photos",
                    "code": "QUERY_ERROR"
                })),
            )
        })?;

    Ok(Json(CountResponse { count }))
}

/// Bind the API listen address. Failing here is a startup error.
pub async fn bind_listener(config: &ApiConfig) -> Result<TcpListener> {
    let addr = format!("{}:{}", config.host, config.port);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(address = %addr, "Feed API listening");
    Ok(listener)
}

/// Serve the feed API on `listener` until `cancel` fires
pub async fn serve(listener: TcpListener, router: Router, cancel: CancellationToken) -> Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("API server error")?;

    info!("Feed API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::window_store::{MemoryStore, Record, StoreError};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    const TTL: Duration = Duration::from_millis(15000);

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn router(store: Arc<dyn TimeWindowedStore>, clock: Arc<ManualClock>) -> Router {
        create_router(AppState { store, clock }, &ApiConfig::default())
    }

    #[tokio::test]
    async fn test_empty_feed_is_empty_object() {
        let clock = Arc::new(ManualClock::new(0));
        let (status, body) = get_json(router(Arc::new(MemoryStore::new()), clock), "/next_photo").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_active_photo_fields() {
        let store = Arc::new(MemoryStore::new());
        store.insert("dog", "ZG9n", 1000, TTL).await.unwrap();
        let clock = Arc::new(ManualClock::new(2000));

        let (_, body) = get_json(router(store, clock), "/next_photo").await;
        assert_eq!(
            body,
            serde_json::json!({
                "id": 1,
                "insert_ts": 1000,
                "delete_ts": 16000,
                "comment": "dog",
                "photo": "ZG9n"
            })
        );
    }

    #[tokio::test]
    async fn test_photos_count() {
        let store = Arc::new(MemoryStore::new());
        store.insert("a", "", 0, TTL).await.unwrap();
        store.insert("b", "", 5000, TTL).await.unwrap();
        let clock = Arc::new(ManualClock::new(6000));

        let (status, body) = get_json(router(store, clock), "/photos_count").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
    }

    struct BrokenStore;

    #[async_trait]
    impl TimeWindowedStore for BrokenStore {
        async fn insert(&self, _: &str, _: &str, _: i64, _: Duration) -> Result<i64, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn active_view(&self, _: i64) -> Result<Vec<Record>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn visible_count(&self, _: i64) -> Result<u64, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
    }

    #[tokio::test]
    async fn test_read_failure_looks_like_empty_feed() {
        let clock = Arc::new(ManualClock::new(0));
        let (status, body) = get_json(router(Arc::new(BrokenStore), clock.clone()), "/next_photo").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({}));

        let (status, _) = get_json(router(Arc::new(BrokenStore), clock), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
