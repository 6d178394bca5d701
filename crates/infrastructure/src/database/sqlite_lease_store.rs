use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use delegate_core::models::{IteratorRecord, Lease};
use delegate_core::traits::LeaseStore;
use delegate_core::{SchedulerError, SchedulerResult};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

const RECORD_COLUMNS: &str = "r.sequence, r.grp, r.record_key, r.account_id, r.priority, r.created_at, \
     r.next_eligible_at, r.failed_attempts, r.disabled";

const LEASE_COLUMNS: &str =
    "grp, record_key, owner, token, acquired_at, expires_at, lease_duration_ms, failed_attempts";

/// SQLite租约存储
///
/// 租约的获取依赖 `INSERT ... ON CONFLICT DO UPDATE ... WHERE expires_at <= now`，
/// 只有旧租约已过期时才会覆盖，`rows_affected` 为 1 即表示获取成功。
pub struct SqliteLeaseStore {
    pool: SqlitePool,
}

impl SqliteLeaseStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn to_millis(time: DateTime<Utc>) -> i64 {
        time.timestamp_millis()
    }

    fn from_millis(millis: i64) -> SchedulerResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| SchedulerError::DatabaseOperation(format!("无效的时间戳: {millis}")))
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<IteratorRecord> {
        Ok(IteratorRecord {
            group: row.try_get("grp")?,
            key: row.try_get("record_key")?,
            account_id: row.try_get("account_id")?,
            priority: row.try_get::<i64, _>("priority")? as i32,
            created_at: Self::from_millis(row.try_get("created_at")?)?,
            sequence: row.try_get::<i64, _>("sequence")? as u64,
            next_eligible_at: Self::from_millis(row.try_get("next_eligible_at")?)?,
            failed_attempts: row.try_get::<i64, _>("failed_attempts")? as u32,
            disabled: row.try_get::<i64, _>("disabled")? != 0,
        })
    }

    fn row_to_lease(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<Lease> {
        Ok(Lease {
            group: row.try_get("grp")?,
            key: row.try_get("record_key")?,
            owner: row.try_get("owner")?,
            token: row.try_get("token")?,
            acquired_at: Self::from_millis(row.try_get("acquired_at")?)?,
            expires_at: Self::from_millis(row.try_get("expires_at")?)?,
            lease_duration_ms: row.try_get("lease_duration_ms")?,
            failed_attempts: row.try_get::<i64, _>("failed_attempts")? as u32,
        })
    }
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    async fn upsert_record(&self, record: IteratorRecord) -> SchedulerResult<IteratorRecord> {
        sqlx::query(
            r#"
            INSERT INTO iterator_records (grp, record_key, account_id, priority, created_at, next_eligible_at, failed_attempts, disabled)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(grp, record_key) DO UPDATE SET
                account_id = excluded.account_id,
                priority = excluded.priority
            "#,
        )
        .bind(&record.group)
        .bind(&record.key)
        .bind(&record.account_id)
        .bind(record.priority as i64)
        .bind(Self::to_millis(record.created_at))
        .bind(Self::to_millis(record.next_eligible_at))
        .bind(record.failed_attempts as i64)
        .bind(record.disabled as i64)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        self.get_record(&record.group, &record.key)
            .await?
            .ok_or_else(|| {
                SchedulerError::DatabaseOperation(format!(
                    "写入迭代记录后读取失败: {}/{}",
                    record.group, record.key
                ))
            })
    }

    async fn get_record(&self, group: &str, key: &str) -> SchedulerResult<Option<IteratorRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM iterator_records r WHERE r.grp = ?1 AND r.record_key = ?2"
        ))
        .bind(group)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn remove_record(&self, group: &str, key: &str) -> SchedulerResult<bool> {
        let mut tx = self.pool.begin().await.map_err(SchedulerError::Database)?;
        sqlx::query("DELETE FROM iterator_leases WHERE grp = ?1 AND record_key = ?2")
            .bind(group)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(SchedulerError::Database)?;
        let result = sqlx::query("DELETE FROM iterator_records WHERE grp = ?1 AND record_key = ?2")
            .bind(group)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(SchedulerError::Database)?;
        tx.commit().await.map_err(SchedulerError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn due_records(
        &self,
        group: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<IteratorRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM iterator_records r
            LEFT JOIN iterator_leases l
                ON l.grp = r.grp AND l.record_key = r.record_key AND l.expires_at > ?2
            WHERE r.grp = ?1
              AND r.disabled = 0
              AND r.next_eligible_at <= ?2
              AND l.token IS NULL
            ORDER BY r.priority DESC, r.created_at ASC, r.sequence ASC
            LIMIT ?3
            "#
        ))
        .bind(group)
        .bind(Self::to_millis(now))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn update_schedule(
        &self,
        group: &str,
        key: &str,
        next_eligible_at: DateTime<Utc>,
        failed_attempts: u32,
        disabled: bool,
    ) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            UPDATE iterator_records
            SET next_eligible_at = ?3, failed_attempts = ?4, disabled = ?5
            WHERE grp = ?1 AND record_key = ?2
            "#,
        )
        .bind(group)
        .bind(key)
        .bind(Self::to_millis(next_eligible_at))
        .bind(failed_attempts as i64)
        .bind(disabled as i64)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;
        Ok(())
    }

    async fn reset_record(&self, group: &str, key: &str, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE iterator_records
            SET next_eligible_at = ?3, failed_attempts = 0, disabled = 0
            WHERE grp = ?1 AND record_key = ?2
            "#,
        )
        .bind(group)
        .bind(key)
        .bind(Self::to_millis(now))
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn try_acquire(
        &self,
        group: &str,
        key: &str,
        owner: &str,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<Lease>> {
        let token = Uuid::new_v4().to_string();
        let result = sqlx::query(
            r#"
            INSERT INTO iterator_leases (grp, record_key, owner, token, acquired_at, expires_at, lease_duration_ms, failed_attempts)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7,
                COALESCE((SELECT failed_attempts FROM iterator_records WHERE grp = ?1 AND record_key = ?2), 0))
            ON CONFLICT(grp, record_key) DO UPDATE SET
                owner = excluded.owner,
                token = excluded.token,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at,
                lease_duration_ms = excluded.lease_duration_ms,
                failed_attempts = excluded.failed_attempts
            WHERE iterator_leases.expires_at <= excluded.acquired_at
            "#,
        )
        .bind(group)
        .bind(key)
        .bind(owner)
        .bind(&token)
        .bind(Self::to_millis(now))
        .bind(Self::to_millis(now + lease_duration))
        .bind(lease_duration.num_milliseconds())
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            debug!("租约 {}/{} 仍被持有", group, key);
            return Ok(None);
        }

        let row = sqlx::query(&format!(
            "SELECT {LEASE_COLUMNS} FROM iterator_leases WHERE grp = ?1 AND record_key = ?2 AND token = ?3"
        ))
        .bind(group)
        .bind(key)
        .bind(&token)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        row.as_ref().map(Self::row_to_lease).transpose()
    }

    async fn release(&self, lease: &Lease) -> SchedulerResult<bool> {
        let result =
            sqlx::query("DELETE FROM iterator_leases WHERE grp = ?1 AND record_key = ?2 AND token = ?3")
                .bind(&lease.group)
                .bind(&lease.key)
                .bind(&lease.token)
                .execute(&self.pool)
                .await
                .map_err(SchedulerError::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_lease(&self, group: &str, key: &str) -> SchedulerResult<Option<Lease>> {
        let row = sqlx::query(&format!(
            "SELECT {LEASE_COLUMNS} FROM iterator_leases WHERE grp = ?1 AND record_key = ?2"
        ))
        .bind(group)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        row.as_ref().map(Self::row_to_lease).transpose()
    }
}
