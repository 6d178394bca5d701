//! 数据仓储层接口定义
//!
//! 调度核心只依赖这些抽象，具体实现位于基础设施层（内存实现与SQLite实现）。
//! 需要并发安全的状态迁移（分配、过期、去重创建）都以原子操作的形式暴露，
//! 调用方不应自行"先读后写"。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    ArtifactStream, DelegateTask, DelegateTaskStatus, PerpetualTaskRecord, WorkflowExecution,
};
use crate::SchedulerResult;

/// 委派任务仓储
#[async_trait]
pub trait DelegateTaskRepository: Send + Sync {
    async fn save(&self, task: &DelegateTask) -> SchedulerResult<()>;

    async fn get(&self, account_id: &str, task_id: &str) -> SchedulerResult<Option<DelegateTask>>;

    async fn delete(&self, account_id: &str, task_id: &str) -> SchedulerResult<bool>;

    /// 任务处于排队且未分配时分配给指定Delegate，返回分配后的任务
    async fn assign_if_unassigned(
        &self,
        account_id: &str,
        task_id: &str,
        delegate_id: &str,
    ) -> SchedulerResult<Option<DelegateTask>>;

    /// 任务已分配给该Delegate且尝试次数一致时迁移到执行中
    async fn start_if_assigned(
        &self,
        account_id: &str,
        task_id: &str,
        delegate_id: &str,
        attempt: u32,
    ) -> SchedulerResult<Option<DelegateTask>>;

    /// 当前状态属于 `expected` 时迁移到 `status`，返回迁移后的任务
    async fn update_status_if(
        &self,
        account_id: &str,
        task_id: &str,
        expected: &[DelegateTaskStatus],
        status: DelegateTaskStatus,
        error_message: Option<String>,
    ) -> SchedulerResult<Option<DelegateTask>>;

    async fn add_validating_delegate(
        &self,
        account_id: &str,
        task_id: &str,
        delegate_id: &str,
    ) -> SchedulerResult<Option<DelegateTask>>;

    async fn add_validation_complete_delegate(
        &self,
        account_id: &str,
        task_id: &str,
        delegate_id: &str,
    ) -> SchedulerResult<Option<DelegateTask>>;

    /// 未结束且已过期的任务
    async fn list_expired(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<DelegateTask>>;
}

/// 周期任务仓储
#[async_trait]
pub trait PerpetualTaskRepository: Send + Sync {
    async fn save(&self, record: &PerpetualTaskRecord) -> SchedulerResult<()>;

    /// 同账号同类型下不存在等价客户端上下文时插入。
    ///
    /// 返回 `(任务id, 是否新建)`；已存在时返回已有任务的 id。
    async fn insert_unless_duplicate(&self, record: &PerpetualTaskRecord) -> SchedulerResult<(String, bool)>;

    async fn get(&self, account_id: &str, task_id: &str) -> SchedulerResult<Option<PerpetualTaskRecord>>;

    async fn remove(&self, account_id: &str, task_id: &str) -> SchedulerResult<bool>;

    async fn list_by_account(&self, account_id: &str) -> SchedulerResult<Vec<PerpetualTaskRecord>>;
}

#[async_trait]
pub trait WorkflowExecutionRepository: Send + Sync {
    async fn get(&self, execution_id: &str) -> SchedulerResult<Option<WorkflowExecution>>;
}

#[async_trait]
pub trait ArtifactStreamRepository: Send + Sync {
    async fn get(&self, stream_id: &str) -> SchedulerResult<Option<ArtifactStream>>;
}
