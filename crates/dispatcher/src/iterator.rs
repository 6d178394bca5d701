use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use delegate_core::config::IteratorConfig;
use delegate_core::models::{IteratorRecord, Lease};
use delegate_core::traits::LeaseStore;
use delegate_core::{entity_span, SchedulerError, SchedulerResult};

use crate::retry_service::BackoffPolicy;

/// 一次处理的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// 按固定周期再次调度
    Reschedule,
    /// 实体已不需要处理，删除记录
    Finished,
}

/// 周期迭代的处理单元
#[async_trait]
pub trait IterationHandler: Send + Sync {
    /// 迭代器分组，同时作为日志中的实体类型
    fn group(&self) -> &str;

    async fn handle(&self, record: &IteratorRecord) -> SchedulerResult<IterationOutcome>;
}

/// 一轮调度的统计
#[derive(Debug, Default)]
pub struct CycleReport {
    pub dispatched: usize,
    /// 租约被占用或线程池已满而跳过的记录
    pub skipped: usize,
    handles: Vec<JoinHandle<()>>,
}

impl CycleReport {
    /// 等待本轮派发的所有处理单元结束
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("迭代处理任务异常退出: {}", e);
            }
        }
    }
}

/// 周期迭代调度器
///
/// 每轮从租约存储取出到期记录，逐个获取租约后放入有界的处理池并行执行。
/// 单个记录的失败只影响它自己的退避进度，不影响同轮的其它记录和调度循环。
pub struct RecurringIterator {
    store: Arc<dyn LeaseStore>,
    handler: Arc<dyn IterationHandler>,
    config: IteratorConfig,
    backoff: BackoffPolicy,
    permits: Arc<Semaphore>,
    owner: String,
}

impl RecurringIterator {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        handler: Arc<dyn IterationHandler>,
        config: IteratorConfig,
        backoff: BackoffPolicy,
    ) -> Self {
        let host = hostname::get()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown-host".to_string());
        Self {
            store,
            handler,
            permits: Arc::new(Semaphore::new(config.thread_pool_size.max(1))),
            config,
            backoff,
            owner: format!("{host}-{}", Uuid::new_v4()),
        }
    }

    pub fn group(&self) -> &str {
        self.handler.group()
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 登记需要周期处理的实体，已登记的保留原有进度
    pub async fn register_key(&self, key: &str, account_id: &str, priority: i32) -> SchedulerResult<IteratorRecord> {
        let mut record = IteratorRecord::new(self.group(), key, account_id);
        record.priority = priority;
        self.store.upsert_record(record).await
    }

    /// 恢复因失败次数过多而被禁用的记录
    pub async fn reset_record(&self, key: &str) -> SchedulerResult<()> {
        if self.store.reset_record(self.group(), key, Utc::now()).await? {
            info!("迭代记录 {}/{} 已重置", self.group(), key);
            Ok(())
        } else {
            Err(SchedulerError::InvalidArgument(format!(
                "迭代记录不存在: {}/{}",
                self.group(),
                key
            )))
        }
    }

    /// 执行一轮调度，处理单元在后台运行
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> SchedulerResult<CycleReport> {
        let group = self.group().to_string();
        let records = self
            .store
            .due_records(&group, now, self.config.batch_size)
            .await?;
        let mut report = CycleReport::default();

        for record in records {
            let lease_duration = self.backoff.lease_duration(record.failed_attempts);
            let lease_duration = chrono::Duration::from_std(lease_duration)
                .map_err(|e| SchedulerError::Internal(format!("租约时长无效: {e}")))?;

            let Some(lease) = self
                .store
                .try_acquire(&group, &record.key, &self.owner, lease_duration, now)
                .await?
            else {
                debug!("记录 {}/{} 的租约已被占用", group, record.key);
                report.skipped += 1;
                continue;
            };

            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("迭代器 {} 处理池已满，记录 {} 留待下一轮", group, record.key);
                    self.store.release(&lease).await?;
                    report.skipped += 1;
                    continue;
                }
            };

            let unit = IterationUnit {
                store: Arc::clone(&self.store),
                handler: Arc::clone(&self.handler),
                backoff: self.backoff.clone(),
                interval: Duration::from_secs(self.config.target_interval_seconds),
            };
            report.handles.push(tokio::spawn(async move {
                unit.process(record, lease).await;
                drop(permit);
            }));
            report.dispatched += 1;
        }

        counter!("iterator_records_dispatched_total", "group" => group.clone())
            .increment(report.dispatched as u64);
        if report.dispatched > 0 {
            debug!("迭代器 {} 本轮派发 {} 条记录", group, report.dispatched);
        }
        Ok(report)
    }

    /// 启动固定周期的调度循环，直到收到关闭信号
    pub fn start(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.config.target_interval_seconds.max(1));
            let mut interval = tokio::time::interval(period);
            info!("启动迭代器 {}，周期 {:?}", self.group(), period);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.run_cycle(Utc::now()).await {
                            error!("迭代器 {} 调度失败: {}", self.group(), e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("迭代器 {} 收到关闭信号", self.group());
                        break;
                    }
                }
            }
        })
    }
}

/// 单条记录的处理，持有租约直到进度写回
struct IterationUnit {
    store: Arc<dyn LeaseStore>,
    handler: Arc<dyn IterationHandler>,
    backoff: BackoffPolicy,
    interval: Duration,
}

impl IterationUnit {
    async fn process(self, record: IteratorRecord, lease: Lease) {
        let span = entity_span(self.handler.group(), &record.key);
        let started = std::time::Instant::now();

        let handler = Arc::clone(&self.handler);
        let target = record.clone();
        let result = tokio::spawn(async move { handler.handle(&target).await }.instrument(span.clone())).await;

        let outcome = match result {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(e.to_string()),
            Err(join_error) if join_error.is_panic() => Err("处理单元发生panic".to_string()),
            Err(join_error) => Err(join_error.to_string()),
        };
        histogram!("iterator_unit_duration_ms", "group" => self.handler.group().to_string())
            .record(started.elapsed().as_millis() as f64);

        if let Err(e) = self.record_outcome(&record, outcome).instrument(span.clone()).await {
            span.in_scope(|| error!("写回迭代进度失败: {}", e));
        }

        match self.store.release(&lease).await {
            Ok(true) => {}
            Ok(false) => span.in_scope(|| debug!("租约已不属于本节点")),
            Err(e) => span.in_scope(|| error!("释放租约失败: {}", e)),
        }
    }

    async fn record_outcome(
        &self,
        record: &IteratorRecord,
        outcome: Result<IterationOutcome, String>,
    ) -> SchedulerResult<()> {
        let group = self.handler.group();
        let now = Utc::now();
        match outcome {
            Ok(IterationOutcome::Reschedule) => {
                let next = now + to_chrono(self.interval);
                self.store
                    .update_schedule(group, &record.key, next, 0, false)
                    .await
            }
            Ok(IterationOutcome::Finished) => {
                self.store.remove_record(group, &record.key).await?;
                debug!("实体处理完毕，移除迭代记录");
                Ok(())
            }
            Err(message) => {
                let failed_attempts = record.failed_attempts.saturating_add(1);
                let disabled = self.backoff.is_exhausted(failed_attempts);
                let next = now + to_chrono(self.backoff.lease_duration(failed_attempts));
                counter!("iterator_unit_failures_total", "group" => group.to_string()).increment(1);

                if disabled {
                    warn!(
                        failed_attempts,
                        "连续失败 {} 次，停止调度: {}", failed_attempts, message
                    );
                } else {
                    error!(failed_attempts, "迭代处理失败: {}", message);
                }
                self.store
                    .update_schedule(group, &record.key, next, failed_attempts, disabled)
                    .await
            }
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(1))
}
