use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 周期迭代器在租约存储中的游标记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IteratorRecord {
    /// 迭代器分组，如 "artifact_collection"
    pub group: String,
    /// 组内的实体标识
    pub key: String,
    pub account_id: String,
    /// 数值越大越先处理
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    /// 插入顺序，由存储分配
    pub sequence: u64,
    pub next_eligible_at: DateTime<Utc>,
    pub failed_attempts: u32,
    pub disabled: bool,
}

impl IteratorRecord {
    pub fn new(group: impl Into<String>, key: impl Into<String>, account_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            group: group.into(),
            key: key.into(),
            account_id: account_id.into(),
            priority: 0,
            created_at: now,
            sequence: 0,
            next_eligible_at: now,
            failed_attempts: 0,
            disabled: false,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.disabled && self.next_eligible_at <= now
    }
}

/// `(group, key)` 上的独占租约
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub group: String,
    pub key: String,
    pub owner: String,
    /// 持有凭证，释放时必须匹配
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub lease_duration_ms: i64,
    pub failed_attempts: u32,
}

impl Lease {
    pub fn new(
        group: impl Into<String>,
        key: impl Into<String>,
        owner: impl Into<String>,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            group: group.into(),
            key: key.into(),
            owner: owner.into(),
            token: uuid::Uuid::new_v4().to_string(),
            acquired_at: now,
            expires_at: now + lease_duration,
            lease_duration_ms: lease_duration.num_milliseconds(),
            failed_attempts: 0,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
