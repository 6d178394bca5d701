pub mod sqlite_lease_store;

pub use sqlite_lease_store::SqliteLeaseStore;

use anyhow::Result;
use delegate_core::config::DatabaseConfig;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::time::Duration;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS iterator_records (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    grp TEXT NOT NULL,
    record_key TEXT NOT NULL,
    account_id TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    next_eligible_at INTEGER NOT NULL,
    failed_attempts INTEGER NOT NULL DEFAULT 0,
    disabled INTEGER NOT NULL DEFAULT 0,
    UNIQUE (grp, record_key)
);

CREATE INDEX IF NOT EXISTS idx_iterator_records_due
    ON iterator_records (grp, disabled, next_eligible_at);

CREATE TABLE IF NOT EXISTS iterator_leases (
    grp TEXT NOT NULL,
    record_key TEXT NOT NULL,
    owner TEXT NOT NULL,
    token TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    lease_duration_ms INTEGER NOT NULL,
    failed_attempts INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (grp, record_key)
);
"#;

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 创建租约存储所需的表
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("数据库表结构已就绪");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub type DbPool = Pool<Sqlite>;
