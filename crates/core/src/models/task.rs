use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SchedulerError;
use crate::models::Capability;
use crate::SchedulerResult;

/// 未排队任务的占位过期时间（毫秒），排队时按实际超时重新计算
pub const DEFAULT_SYNC_CALL_TIMEOUT_MS: u64 = 20_000;

/// 委派任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Http,
    ShellScript,
    KubernetesFetch,
    GitFetch,
    DockerRegistryValidation,
    ArtifactCollection,
    CapabilityValidation,
}

static TASK_TYPE_LOOKUP: Lazy<HashMap<&'static str, TaskType>> = Lazy::new(|| {
    TaskType::ALL
        .iter()
        .map(|task_type| (task_type.as_str(), *task_type))
        .collect()
});

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::Http,
        TaskType::ShellScript,
        TaskType::KubernetesFetch,
        TaskType::GitFetch,
        TaskType::DockerRegistryValidation,
        TaskType::ArtifactCollection,
        TaskType::CapabilityValidation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Http => "HTTP",
            TaskType::ShellScript => "SHELL_SCRIPT",
            TaskType::KubernetesFetch => "KUBERNETES_FETCH",
            TaskType::GitFetch => "GIT_FETCH",
            TaskType::DockerRegistryValidation => "DOCKER_REGISTRY_VALIDATION",
            TaskType::ArtifactCollection => "ARTIFACT_COLLECTION",
            TaskType::CapabilityValidation => "CAPABILITY_VALIDATION",
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TASK_TYPE_LOOKUP
            .get(s)
            .copied()
            .ok_or_else(|| SchedulerError::InvalidArgument(format!("未知的任务类型: {s}")))
    }
}

/// 委派任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegateTaskStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "ASSIGNED")]
    Assigned,
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "EXPIRED")]
    Expired,
    #[serde(rename = "ABORTED")]
    Aborted,
}

impl DelegateTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DelegateTaskStatus::Completed
                | DelegateTaskStatus::Failed
                | DelegateTaskStatus::Expired
                | DelegateTaskStatus::Aborted
        )
    }
}

/// 委派任务
///
/// 由调度端创建、交给某一个远端Delegate执行的工作单元。同一时刻一个任务
/// 最多只有一个Delegate在执行；失败重试时沿用同一个 `id`，`attempt` 递增。
///
/// ```rust
/// use delegate_core::models::{DelegateTask, DelegateTaskStatus, TaskType};
///
/// let task = DelegateTask::new("acc-1", TaskType::Http, b"{}".to_vec());
/// assert_eq!(task.status, DelegateTaskStatus::Queued);
/// assert_eq!(task.attempt, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateTask {
    pub id: String,
    pub account_id: String,
    pub task_type: TaskType,
    /// 不透明的任务参数，原样透传给Delegate
    pub parameters: Vec<u8>,
    /// 为 0 时排队时使用配置的默认超时
    pub timeout_ms: u64,
    pub is_async: bool,
    pub capabilities: Vec<Capability>,
    /// 显式指定的Delegate白名单，为空表示不限制
    pub delegate_whitelist: Vec<String>,
    pub excluded_delegate_ids: BTreeSet<String>,
    pub broadcast_delegate_ids: Vec<String>,
    pub validating_delegate_ids: BTreeSet<String>,
    pub validation_complete_delegate_ids: BTreeSet<String>,
    pub attempt: u32,
    pub status: DelegateTaskStatus,
    pub delegate_id: Option<String>,
    pub description: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DelegateTask {
    pub fn new(account_id: impl Into<String>, task_type: TaskType, parameters: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            task_type,
            parameters,
            timeout_ms: 0,
            is_async: false,
            capabilities: Vec::new(),
            delegate_whitelist: Vec::new(),
            excluded_delegate_ids: BTreeSet::new(),
            broadcast_delegate_ids: Vec::new(),
            validating_delegate_ids: BTreeSet::new(),
            validation_complete_delegate_ids: BTreeSet::new(),
            attempt: 1,
            status: DelegateTaskStatus::Queued,
            delegate_id: None,
            description: None,
            error_message: None,
            created_at: now,
            expires_at: now + Duration::milliseconds(DEFAULT_SYNC_CALL_TIMEOUT_MS as i64),
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// 未分配且未结束的任务才能被Delegate领取
    pub fn is_assignable(&self) -> bool {
        self.status == DelegateTaskStatus::Queued && self.delegate_id.is_none()
    }

    /// 指定Delegate是否正在执行这一次尝试
    pub fn is_running_on(&self, delegate_id: &str, attempt: u32) -> bool {
        matches!(
            self.status,
            DelegateTaskStatus::Assigned | DelegateTaskStatus::Started
        ) && self.delegate_id.as_deref() == Some(delegate_id)
            && self.attempt == attempt
    }

    /// 转换为发送给Delegate的任务包
    pub fn to_package(&self) -> TaskPackage {
        TaskPackage {
            task_id: self.id.clone(),
            account_id: self.account_id.clone(),
            task_type: self.task_type,
            parameters: self.parameters.clone(),
            timeout_ms: self.timeout_ms,
            attempt: self.attempt,
            delegate_id: self.delegate_id.clone(),
            capabilities: Vec::new(),
        }
    }

    /// 验证任务包：只携带需要Delegate检查的能力，不携带参数
    pub fn to_validation_package(&self, delegate_id: &str) -> TaskPackage {
        TaskPackage {
            task_id: self.id.clone(),
            account_id: self.account_id.clone(),
            task_type: TaskType::CapabilityValidation,
            parameters: Vec::new(),
            timeout_ms: self.timeout_ms,
            attempt: self.attempt,
            delegate_id: Some(delegate_id.to_string()),
            capabilities: self.capabilities.clone(),
        }
    }
}

/// 发送给Delegate执行的任务包
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPackage {
    pub task_id: String,
    pub account_id: String,
    pub task_type: TaskType,
    pub parameters: Vec<u8>,
    pub timeout_ms: u64,
    pub attempt: u32,
    pub delegate_id: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl TaskPackage {
    pub fn encode(&self) -> SchedulerResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> SchedulerResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
