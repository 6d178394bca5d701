use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 工作流执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Waiting,
    Success,
    Failed,
    Error,
    Expired,
    Aborted,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Failed
                | ExecutionStatus::Error
                | ExecutionStatus::Expired
                | ExecutionStatus::Aborted
        )
    }
}

/// 监控器关心的工作流执行快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub account_id: String,
    pub status: ExecutionStatus,
    /// 仍在进行中的子状态（步骤、等待中的审批等）数量
    pub active_sub_states: u32,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}
