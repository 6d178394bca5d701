use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delegate节点信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelegateInfo {
    pub id: String,
    pub account_id: String,
    pub hostname: String,
    pub status: DelegateStatus,
    /// 选择器标签，用于匹配任务的 Selector 能力
    pub tags: Vec<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

/// Delegate状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DelegateStatus {
    #[serde(rename = "ENABLED")]
    Enabled,
    #[serde(rename = "DISABLED")]
    Disabled,
    #[serde(rename = "DELETED")]
    Deleted,
}

impl DelegateInfo {
    pub fn new(id: impl Into<String>, account_id: impl Into<String>, hostname: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            account_id: account_id.into(),
            hostname: hostname.into(),
            status: DelegateStatus::Enabled,
            tags: Vec::new(),
            last_heartbeat: now,
            registered_at: now,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.status, DelegateStatus::Enabled)
    }

    pub fn update_heartbeat(&mut self, timestamp: DateTime<Utc>) {
        self.last_heartbeat = timestamp;
    }
}
