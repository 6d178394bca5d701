use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use rand::seq::SliceRandom;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use delegate_core::config::DispatcherConfig;
use delegate_core::models::{
    CapabilityCheckResult, DelegateInfo, DelegateTask, DelegateTaskStatus, RetryDecision,
    SelectionLog, TaskExecutionResponse, TaskPackage, TaskResponseData,
};
use delegate_core::traits::{DelegateTaskRepository, TaskTransport};
use delegate_core::{SchedulerError, SchedulerResult};

use crate::assignment::TaskAssignmentEvaluator;
use crate::delegate_cache::DelegateCache;
use crate::retry_service::{requeue_task, RetryCoordinator};
use crate::sync_executor::SyncTaskExecutor;

const ABORTED_MESSAGE: &str = "Delegate task was aborted";
const EXPIRED_MESSAGE: &str = "Task expired";

const OPEN_STATUSES: [DelegateTaskStatus; 3] = [
    DelegateTaskStatus::Queued,
    DelegateTaskStatus::Assigned,
    DelegateTaskStatus::Started,
];

/// Delegate领取任务的结果
#[derive(Debug, Clone, PartialEq)]
pub enum TaskAcquisition {
    /// 先验证能力，验证结果通过 `report_connection_results` 上报
    Validate(TaskPackage),
    Execute(TaskPackage),
}

/// 处理Delegate响应后的任务去向
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Completed,
    Requeued { attempt: u32 },
    Failed { reason: String },
    /// 任务已结束、响应不属于当前执行，或同一次执行的响应已处理过
    Ignored,
}

/// 委派任务服务
///
/// 负责任务的排队、领取、响应处理、过期与中止。同步任务的等待者按任务 id
/// 登记在传输层，重试期间保持不变，任务最终结束时才收到结果。
pub struct DelegateTaskService {
    repository: Arc<dyn DelegateTaskRepository>,
    evaluator: TaskAssignmentEvaluator,
    executor: SyncTaskExecutor,
    retry: Arc<RetryCoordinator>,
    config: DispatcherConfig,
}

impl DelegateTaskService {
    pub fn new(
        repository: Arc<dyn DelegateTaskRepository>,
        cache: Arc<DelegateCache>,
        transport: Arc<dyn TaskTransport>,
        retry: Arc<RetryCoordinator>,
        config: DispatcherConfig,
    ) -> Self {
        let executor = SyncTaskExecutor::new(
            transport,
            Duration::from_millis(config.sync_call_timeout_ms),
        );
        Self {
            repository,
            evaluator: TaskAssignmentEvaluator::new(cache),
            executor,
            retry,
            config,
        }
    }

    pub fn evaluator(&self) -> &TaskAssignmentEvaluator {
        &self.evaluator
    }

    fn transport(&self) -> &Arc<dyn TaskTransport> {
        self.executor.transport()
    }

    pub fn register_delegate(&self, delegate: DelegateInfo) {
        info!("Delegate {} 已注册到账号 {}", delegate.id, delegate.account_id);
        self.evaluator.cache().register(delegate);
    }

    /// 记录Delegate心跳，未注册的Delegate返回 `false`
    pub fn delegate_heartbeat(&self, delegate_id: &str) -> bool {
        let known = self.evaluator.cache().heartbeat(delegate_id, Utc::now());
        if !known {
            debug!("收到未注册Delegate {} 的心跳", delegate_id);
        }
        known
    }

    pub async fn get_task(&self, account_id: &str, task_id: &str) -> SchedulerResult<DelegateTask> {
        self.repository
            .get(account_id, task_id)
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })
    }

    /// 计算可执行的Delegate并保存任务
    ///
    /// 候选顺序随机，白名单中的第一个候选排在最前。
    pub async fn queue_task(&self, mut task: DelegateTask) -> SchedulerResult<(DelegateTask, SelectionLog)> {
        if task.timeout_ms == 0 {
            task.timeout_ms = if task.is_async {
                self.config.delegated_call_timeout_ms
            } else {
                self.config.sync_call_timeout_ms
            };
        }

        let (mut eligible, log) = self.evaluator.eligible_delegates(&task);
        if eligible.is_empty() {
            warn!("任务 {} 没有可用的Delegate，候选 {} 个", task.id, log.len());
            counter!("delegate_task_no_eligible_total").increment(1);
            return Err(SchedulerError::NoEligibleDelegates { task_id: task.id });
        }

        eligible.shuffle(&mut rand::rng());
        if let Some(position) = eligible
            .iter()
            .position(|id| !task.delegate_whitelist.is_empty() && self.evaluator.is_whitelisted(&task, id))
        {
            eligible.swap(0, position);
        }

        let now = Utc::now();
        task.broadcast_delegate_ids = eligible;
        task.status = DelegateTaskStatus::Queued;
        task.delegate_id = None;
        task.expires_at = now + chrono::Duration::milliseconds(task.timeout_ms as i64);
        self.repository.save(&task).await?;

        counter!("delegate_task_queued_total", "type" => task.task_type.as_str()).increment(1);
        debug!(
            "任务 {} 已排队，候选Delegate: {:?}",
            task.id, task.broadcast_delegate_ids
        );
        Ok((task, log))
    }

    /// 排队并同步等待执行结果
    pub async fn execute_task(
        &self,
        mut task: DelegateTask,
        error_context: &str,
    ) -> SchedulerResult<TaskExecutionResponse> {
        task.is_async = false;
        let (task, _) = self.queue_task(task).await?;
        let pending = self.transport().send(task.to_package()).await?;

        let result = self.executor.await_response(&task, pending, error_context).await;
        match &result {
            Ok(_) => {
                self.repository
                    .update_status_if(&task.account_id, &task.id, &OPEN_STATUSES, DelegateTaskStatus::Completed, None)
                    .await?;
            }
            Err(SchedulerError::ExecutionTimeout) => {
                self.repository
                    .update_status_if(
                        &task.account_id,
                        &task.id,
                        &OPEN_STATUSES,
                        DelegateTaskStatus::Expired,
                        Some(EXPIRED_MESSAGE.to_string()),
                    )
                    .await?;
            }
            Err(e) => {
                self.repository
                    .update_status_if(
                        &task.account_id,
                        &task.id,
                        &OPEN_STATUSES,
                        DelegateTaskStatus::Failed,
                        Some(e.to_string()),
                    )
                    .await?;
            }
        }
        result
    }

    /// 排队并下发异步任务，不等待结果
    pub async fn submit_async(&self, mut task: DelegateTask) -> SchedulerResult<String> {
        task.is_async = true;
        let (task, _) = self.queue_task(task).await?;
        self.transport().broadcast(task.to_package()).await?;
        info!("异步任务 {} 已下发", task.id);
        Ok(task.id)
    }

    /// Delegate领取任务
    ///
    /// 仍有能力需要该Delegate验证时返回验证任务包；否则在白名单内时原子地分配。
    pub async fn acquire_task(
        &self,
        account_id: &str,
        delegate_id: &str,
        task_id: &str,
    ) -> SchedulerResult<Option<TaskAcquisition>> {
        let task = self.get_task(account_id, task_id).await?;
        if !task.is_assignable() {
            debug!("任务 {} 已分配或已结束，Delegate {} 领取失败", task_id, delegate_id);
            return Ok(None);
        }

        let mut log = SelectionLog::new(task_id);
        if !self.evaluator.can_assign(&mut log, delegate_id, &task) {
            return Ok(None);
        }

        if self.evaluator.should_validate(&task, delegate_id) {
            let Some(task) = self
                .repository
                .add_validating_delegate(account_id, task_id, delegate_id)
                .await?
            else {
                return Ok(None);
            };
            debug!("Delegate {} 需要先验证任务 {} 的能力", delegate_id, task_id);
            return Ok(Some(TaskAcquisition::Validate(task.to_validation_package(delegate_id))));
        }

        if !self.evaluator.is_whitelisted(&task, delegate_id) {
            return Ok(None);
        }
        self.assign(account_id, delegate_id, task_id).await
    }

    /// Delegate上报能力验证结果，全部满足时直接分配
    pub async fn report_connection_results(
        &self,
        account_id: &str,
        delegate_id: &str,
        task_id: &str,
        results: Vec<CapabilityCheckResult>,
    ) -> SchedulerResult<Option<TaskAcquisition>> {
        for result in results {
            self.evaluator.cache().record_result(result);
        }

        let Some(task) = self
            .repository
            .add_validation_complete_delegate(account_id, task_id, delegate_id)
            .await?
        else {
            return Err(SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            });
        };
        if !task.is_assignable() {
            return Ok(None);
        }

        let mut log = SelectionLog::new(task_id);
        if !self.evaluator.can_assign(&mut log, delegate_id, &task)
            || self.evaluator.should_validate(&task, delegate_id)
        {
            debug!("Delegate {} 验证后仍不能执行任务 {}", delegate_id, task_id);
            return Ok(None);
        }
        self.assign(account_id, delegate_id, task_id).await
    }

    async fn assign(
        &self,
        account_id: &str,
        delegate_id: &str,
        task_id: &str,
    ) -> SchedulerResult<Option<TaskAcquisition>> {
        match self
            .repository
            .assign_if_unassigned(account_id, task_id, delegate_id)
            .await?
        {
            Some(task) => {
                info!("任务 {} 已分配给Delegate {}", task_id, delegate_id);
                counter!("delegate_task_assigned_total").increment(1);
                Ok(Some(TaskAcquisition::Execute(task.to_package())))
            }
            None => {
                debug!("任务 {} 已被其它Delegate领取", task_id);
                Ok(None)
            }
        }
    }

    /// Delegate开始执行已分配给它的任务
    pub async fn start_task(
        &self,
        account_id: &str,
        delegate_id: &str,
        task_id: &str,
        attempt: u32,
    ) -> SchedulerResult<bool> {
        let started = self
            .repository
            .start_if_assigned(account_id, task_id, delegate_id, attempt)
            .await?;
        if started.is_none() {
            debug!(
                "任务 {} 第 {} 次执行未分配给Delegate {}，拒绝开始",
                task_id, attempt, delegate_id
            );
            return Ok(false);
        }
        debug!("Delegate {} 开始执行任务 {}", delegate_id, task_id);
        Ok(true)
    }

    /// 处理Delegate的执行响应
    ///
    /// 只接受任务当前分配的Delegate针对当前尝试次数的响应。
    pub async fn process_response(
        &self,
        account_id: &str,
        task_id: &str,
        delegate_id: &str,
        attempt: u32,
        response: TaskResponseData,
    ) -> SchedulerResult<ResponseOutcome> {
        let task = self.get_task(account_id, task_id).await?;
        if task.status.is_terminal() {
            debug!("任务 {} 已结束({:?})，忽略响应", task_id, task.status);
            return Ok(ResponseOutcome::Ignored);
        }
        if !task.is_running_on(delegate_id, attempt) {
            warn!(
                "忽略任务 {} 的过期或越权响应: Delegate {} 第 {} 次，当前分配 {:?} 第 {} 次",
                task_id, delegate_id, attempt, task.delegate_id, task.attempt
            );
            counter!("delegate_task_response_rejected_total").increment(1);
            return Ok(ResponseOutcome::Ignored);
        }
        if !self.retry.on_task_response_processed(&task, delegate_id).await {
            return Ok(ResponseOutcome::Ignored);
        }

        let Some(failure) = response.failure_message() else {
            self.repository
                .update_status_if(account_id, task_id, &OPEN_STATUSES, DelegateTaskStatus::Completed, None)
                .await?;
            self.notify_waiter(task_id, &response).await;
            counter!("delegate_task_completed_total").increment(1);
            info!("任务 {} 执行成功", task_id);
            return Ok(ResponseOutcome::Completed);
        };

        let decision = self.retry.decide(&task, Some(delegate_id), &failure).await;
        match decision {
            RetryDecision::Retry { .. } => self.requeue(&task, &decision, &failure).await,
            RetryDecision::GiveUp { reason } => self.fail(&task, reason, &failure).await,
        }
    }

    async fn requeue(
        &self,
        task: &DelegateTask,
        decision: &RetryDecision,
        failure: &str,
    ) -> SchedulerResult<ResponseOutcome> {
        let mut next = requeue_task(task, decision, Utc::now());
        let (eligible, _) = self.evaluator.eligible_delegates(&next);
        if eligible.is_empty() {
            let reason = format!("重试时没有可用的Delegate: {failure}");
            return self.fail(task, reason, failure).await;
        }
        next.broadcast_delegate_ids = eligible;
        self.repository.save(&next).await?;
        counter!("delegate_task_requeued_total").increment(1);

        let delay = match decision {
            RetryDecision::Retry { delay, .. } => *delay,
            RetryDecision::GiveUp { .. } => Duration::ZERO,
        };
        let package = next.to_package();
        if delay.is_zero() {
            self.transport().broadcast(package).await?;
        } else {
            let transport = Arc::clone(self.transport());
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = transport.broadcast(package).await {
                    error!("延迟重新下发任务失败: {}", e);
                }
            });
        }
        info!("任务 {} 重新排队，第 {} 次执行", next.id, next.attempt);
        Ok(ResponseOutcome::Requeued {
            attempt: next.attempt,
        })
    }

    /// 任务最终失败：记录放弃原因，同步等待者收到最后一次执行的错误
    async fn fail(&self, task: &DelegateTask, reason: String, failure: &str) -> SchedulerResult<ResponseOutcome> {
        self.repository
            .update_status_if(
                &task.account_id,
                &task.id,
                &OPEN_STATUSES,
                DelegateTaskStatus::Failed,
                Some(reason.clone()),
            )
            .await?;
        self.notify_waiter(&task.id, &TaskResponseData::error_notify(failure))
            .await;
        counter!("delegate_task_failed_total").increment(1);
        warn!("任务 {} 执行失败: {}", task.id, reason);
        Ok(ResponseOutcome::Failed { reason })
    }

    /// 把过期的未结束任务标记为过期
    pub async fn expire_task(&self, account_id: &str, task_id: &str) -> SchedulerResult<bool> {
        let task = self.get_task(account_id, task_id).await?;
        self.expire(&task, Utc::now()).await
    }

    /// 扫描并过期所有超时的任务，返回过期数量
    pub async fn expire_overdue_tasks(&self, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let mut expired = 0;
        for task in self.repository.list_expired(now).await? {
            match self.expire(&task, now).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => error!("过期任务 {} 失败: {}", task.id, e),
            }
        }
        if expired > 0 {
            info!("本次扫描过期 {} 个任务", expired);
        }
        Ok(expired)
    }

    async fn expire(&self, task: &DelegateTask, now: DateTime<Utc>) -> SchedulerResult<bool> {
        if !task.is_expired(now) {
            return Ok(false);
        }
        let updated = self
            .repository
            .update_status_if(
                &task.account_id,
                &task.id,
                &OPEN_STATUSES,
                DelegateTaskStatus::Expired,
                Some(EXPIRED_MESSAGE.to_string()),
            )
            .await?;
        if updated.is_none() {
            return Ok(false);
        }
        self.notify_waiter(&task.id, &TaskResponseData::expired(EXPIRED_MESSAGE))
            .await;
        counter!("delegate_task_expired_total").increment(1);
        warn!("任务 {} 已过期", task.id);
        Ok(true)
    }

    /// 中止未结束的任务
    pub async fn abort_task(&self, account_id: &str, task_id: &str) -> SchedulerResult<bool> {
        let updated = self
            .repository
            .update_status_if(
                account_id,
                task_id,
                &OPEN_STATUSES,
                DelegateTaskStatus::Aborted,
                Some(ABORTED_MESSAGE.to_string()),
            )
            .await?;
        if updated.is_none() {
            return Ok(false);
        }
        self.notify_waiter(task_id, &TaskResponseData::error_notify(ABORTED_MESSAGE))
            .await;
        info!("任务 {} 已中止", task_id);
        Ok(true)
    }

    async fn notify_waiter(&self, task_id: &str, response: &TaskResponseData) {
        match response.encode() {
            Ok(bytes) => {
                if !self.transport().deliver_response(task_id, bytes).await {
                    debug!("任务 {} 没有同步等待者", task_id);
                }
            }
            Err(e) => error!("编码任务 {} 的响应失败: {}", task_id, e),
        }
    }

    /// 启动周期性的过期扫描
    pub fn start_expiry_sweep(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.config.expiry_sweep_interval_seconds.max(1));
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.expire_overdue_tasks(Utc::now()).await {
                            error!("任务过期扫描失败: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("任务过期扫描收到关闭信号");
                        break;
                    }
                }
            }
        })
    }
}
