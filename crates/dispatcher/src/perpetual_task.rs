use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tracing::{debug, info};
use uuid::Uuid;

use delegate_core::config::PerpetualTaskConfig;
use delegate_core::models::{
    PerpetualTaskClientContext, PerpetualTaskExecutionBundle, PerpetualTaskRecord,
    PerpetualTaskSchedule, PerpetualTaskState, PerpetualTaskType,
};
use delegate_core::traits::{CapabilityDemander, PerpetualTaskRepository};
use delegate_core::{SchedulerError, SchedulerResult};

/// 周期任务注册中心
///
/// 只维护周期任务的定义与分配状态，分配给哪个Delegate由外部的分发方决定。
pub struct PerpetualTaskService {
    repository: Arc<dyn PerpetualTaskRepository>,
    config: PerpetualTaskConfig,
}

impl PerpetualTaskService {
    pub fn new(repository: Arc<dyn PerpetualTaskRepository>, config: PerpetualTaskConfig) -> Self {
        Self { repository, config }
    }

    pub fn default_schedule(&self) -> PerpetualTaskSchedule {
        PerpetualTaskSchedule::new(
            self.config.default_interval_seconds,
            self.config.default_timeout_seconds,
        )
    }

    /// 创建周期任务
    ///
    /// `allow_duplicate` 为 `false` 时，同账号同类型下已有等价上下文的任务会直接返回其 id。
    pub async fn create_task(
        &self,
        task_type: PerpetualTaskType,
        account_id: &str,
        client_context: PerpetualTaskClientContext,
        schedule: Option<PerpetualTaskSchedule>,
        allow_duplicate: bool,
        description: Option<String>,
    ) -> SchedulerResult<String> {
        let schedule = schedule.unwrap_or_else(|| self.default_schedule());
        schedule.validate()?;

        let now = Utc::now();
        let mut client_context = client_context;
        client_context.last_context_updated.get_or_insert(now);
        let record = PerpetualTaskRecord {
            id: Uuid::new_v4().to_string(),
            task_type,
            account_id: account_id.to_string(),
            client_context,
            schedule,
            state: PerpetualTaskState::Unassigned,
            delegate_id: None,
            description,
            created_at: now,
            updated_at: now,
        };

        if allow_duplicate {
            self.repository.save(&record).await?;
            self.created(&record);
            return Ok(record.id);
        }

        let (task_id, created) = self.repository.insert_unless_duplicate(&record).await?;
        if created {
            self.created(&record);
        } else {
            debug!(
                "账号 {} 已存在等价的 {} 周期任务 {}",
                account_id,
                task_type.as_str(),
                task_id
            );
        }
        Ok(task_id)
    }

    /// 创建携带执行包的周期任务
    ///
    /// 执行包由参数和 `demander` 要求的Delegate能力组成，编码后放入客户端上下文。
    pub async fn create_task_with_bundle(
        &self,
        task_type: PerpetualTaskType,
        account_id: &str,
        client_context: PerpetualTaskClientContext,
        params: Vec<u8>,
        demander: &dyn CapabilityDemander,
        schedule: Option<PerpetualTaskSchedule>,
    ) -> SchedulerResult<String> {
        let bundle = build_execution_bundle(task_type, params, demander);
        debug!(
            "{} 周期任务执行包需要 {} 项能力",
            task_type.as_str(),
            bundle.capabilities.len()
        );
        let mut client_context = client_context;
        client_context.execution_bundle = Some(bundle.encode()?);
        self.create_task(task_type, account_id, client_context, schedule, false, None)
            .await
    }

    fn created(&self, record: &PerpetualTaskRecord) {
        counter!("perpetual_task_created_total", "type" => record.task_type.as_str()).increment(1);
        info!(
            "创建周期任务 {} ({})，间隔 {}s，超时 {}s",
            record.id,
            record.task_type.as_str(),
            record.schedule.interval_seconds,
            record.schedule.timeout_seconds
        );
    }

    /// 删除周期任务，任务不存在时同样成功
    pub async fn delete_task(&self, account_id: &str, task_id: &str) -> SchedulerResult<()> {
        if self.repository.remove(account_id, task_id).await? {
            counter!("perpetual_task_deleted_total").increment(1);
            info!("删除周期任务 {}", task_id);
        } else {
            debug!("周期任务 {} 不存在，无需删除", task_id);
        }
        Ok(())
    }

    pub async fn get_task(&self, account_id: &str, task_id: &str) -> SchedulerResult<PerpetualTaskRecord> {
        self.repository
            .get(account_id, task_id)
            .await?
            .ok_or_else(|| SchedulerError::PerpetualTaskNotFound {
                id: task_id.to_string(),
            })
    }

    pub async fn list_tasks(&self, account_id: &str) -> SchedulerResult<Vec<PerpetualTaskRecord>> {
        self.repository.list_by_account(account_id).await
    }

    /// 取消当前分配，等待重新分配
    pub async fn reset_task(&self, account_id: &str, task_id: &str) -> SchedulerResult<()> {
        self.modify(account_id, task_id, |record| {
            if record.state != PerpetualTaskState::Paused {
                record.state = PerpetualTaskState::Unassigned;
            }
            record.delegate_id = None;
        })
        .await?;
        info!("重置周期任务 {}", task_id);
        Ok(())
    }

    pub async fn pause_task(&self, account_id: &str, task_id: &str) -> SchedulerResult<()> {
        self.modify(account_id, task_id, |record| {
            record.state = PerpetualTaskState::Paused;
            record.delegate_id = None;
        })
        .await?;
        info!("暂停周期任务 {}", task_id);
        Ok(())
    }

    pub async fn resume_task(&self, account_id: &str, task_id: &str) -> SchedulerResult<()> {
        self.modify(account_id, task_id, |record| {
            if record.state == PerpetualTaskState::Paused {
                record.state = PerpetualTaskState::Unassigned;
            }
        })
        .await?;
        info!("恢复周期任务 {}", task_id);
        Ok(())
    }

    pub async fn update_schedule(
        &self,
        account_id: &str,
        task_id: &str,
        schedule: PerpetualTaskSchedule,
    ) -> SchedulerResult<()> {
        schedule.validate()?;
        self.modify(account_id, task_id, |record| record.schedule = schedule)
            .await
    }

    async fn modify<F>(&self, account_id: &str, task_id: &str, change: F) -> SchedulerResult<()>
    where
        F: FnOnce(&mut PerpetualTaskRecord) + Send,
    {
        let mut record = self.get_task(account_id, task_id).await?;
        change(&mut record);
        record.updated_at = Utc::now();
        self.repository.save(&record).await
    }
}

/// 构建周期任务执行包，附带执行所需的Delegate能力
pub fn build_execution_bundle(
    task_type: PerpetualTaskType,
    params: Vec<u8>,
    demander: &dyn CapabilityDemander,
) -> PerpetualTaskExecutionBundle {
    PerpetualTaskExecutionBundle {
        task_type,
        params,
        capabilities: demander.fetch_required_capabilities(),
    }
}
