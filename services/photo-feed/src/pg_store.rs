use crate::config::DatabaseConfig;
use crate::window_store::{ttl_millis, window_end, Record, StoreError, TimeWindowedStore};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// PostgreSQL-backed time-windowed store
pub struct PgStore {
    pool: PgPool,
    /// Next id to hand out; held across the insert so ids follow commit order.
    /// Advanced before every insert attempt, so failures leave gaps.
    next_id: Mutex<i64>,
}

impl PgStore {
    /// Connect to PostgreSQL, optionally migrating and clearing the photos table
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = connect_options(config)?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect_with(options)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        if config.run_migrations {
            run_migrations(&pool).await?;
        }

        if config.reset_on_startup {
            warn!("reset_on_startup is set, erasing all stored photos");
            sqlx::query("TRUNCATE photos")
                .execute(&pool)
                .await
                .context("Failed to reset photos table")?;
        }

        let max_id: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM photos")
            .fetch_one(&pool)
            .await
            .context("Failed to read highest photo id")?;

        Ok(Self {
            pool,
            next_id: Mutex::new(max_id.unwrap_or(0) + 1),
        })
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close all pooled connections
    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
    }
}

/// Run database migrations
async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")?;

    info!("Database migrations completed");
    Ok(())
}

/// Build connection options, requiring every configured certificate to exist
fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
    let mut options =
        PgConnectOptions::from_str(&config.url).context("Invalid database URL")?;

    let certs = [
        ("database.ssl_root_cert", &config.ssl_root_cert),
        ("database.ssl_client_cert", &config.ssl_client_cert),
        ("database.ssl_client_key", &config.ssl_client_key),
    ];
    for (field, path) in certs {
        if let Some(path) = path {
            require_file(field, path)?;
        }
    }

    if let Some(ref ca) = config.ssl_root_cert {
        options = options.ssl_mode(PgSslMode::VerifyCa).ssl_root_cert(ca);
    }
    if let Some(ref cert) = config.ssl_client_cert {
        options = options.ssl_client_cert(cert);
    }
    if let Some(ref key) = config.ssl_client_key {
        options = options.ssl_client_key(key);
    }

    Ok(options)
}

fn require_file(field: &str, path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("{} points to missing file {}", field, path.display());
    }
    Ok(())
}

#[async_trait]
impl TimeWindowedStore for PgStore {
    #[instrument(skip(self, payload), fields(payload_len = payload.len()))]
    async fn insert(
        &self,
        comment: &str,
        payload: &str,
        now: i64,
        ttl: Duration,
    ) -> Result<i64, StoreError> {
        let ttl_ms = ttl_millis(ttl)?;
        let delete_ts = window_end(now, ttl_ms)?;

        // spent even when the insert fails; a lost reply may still have committed it
        let mut next_id = self.next_id.lock().await;
        let id = *next_id;
        *next_id += 1;

        let result = sqlx::query(
            r#"
            INSERT INTO photos (id, insert_ts, delete_ts, comment, photo)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(delete_ts)
        .bind(comment)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::RowCount {
                expected: 1,
                actual: result.rows_affected(),
            });
        }

        debug!(id, insert_ts = now, ttl_ms, "Photo inserted");
        Ok(id)
    }

    async fn active_view(&self, now: i64) -> Result<Vec<Record>, StoreError> {
        let rows = sqlx::query_as::<_, Record>(
            r#"
            SELECT id, insert_ts, delete_ts, comment, photo
            FROM photos
            WHERE insert_ts <= $1 AND $1 < delete_ts
            ORDER BY insert_ts ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn visible_count(&self, now: i64) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM photos
            WHERE insert_ts <= $1 AND $1 < delete_ts
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn db_config() -> DatabaseConfig {
        DatabaseConfig {
            url: "postgres://photos@localhost:5432/photos".to_string(),
            max_connections: 2,
            min_connections: 1,
            connect_timeout_secs: 1,
            idle_timeout_secs: 60,
            run_migrations: true,
            reset_on_startup: true,
            ssl_root_cert: None,
            ssl_client_cert: None,
            ssl_client_key: None,
        }
    }

    #[test]
    fn test_connect_options_without_tls() {
        assert!(connect_options(&db_config()).is_ok());
    }

    #[test]
    fn test_missing_certificate_is_named() {
        let mut config = db_config();
        config.ssl_root_cert = Some(PathBuf::from("/nonexistent/ca.crt"));

        let err = connect_options(&config).unwrap_err().to_string();
        assert!(err.contains("database.ssl_root_cert"));
        assert!(err.contains("/nonexistent/ca.crt"));
    }

    #[test]
    fn test_existing_certificates_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("ca.crt");
        std::fs::write(&ca, b"-----BEGIN CERTIFICATE-----").unwrap();

        let mut config = db_config();
        config.ssl_root_cert = Some(ca);
        assert!(connect_options(&config).is_ok());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let mut config = db_config();
        config.url = "not a url".to_string();
        assert!(connect_options(&config).is_err());
    }
}
