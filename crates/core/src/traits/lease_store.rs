//! 租约存储接口
//!
//! 周期迭代器的唯一事实来源：既保存每个 `(group, key)` 的调度游标，
//! 也保存该键上的独占租约。所有读改写操作必须是原子的。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::models::{IteratorRecord, Lease};
use crate::SchedulerResult;

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// 插入迭代记录；已存在时只更新账号与优先级，保留调度进度与插入顺序
    async fn upsert_record(&self, record: IteratorRecord) -> SchedulerResult<IteratorRecord>;

    async fn get_record(&self, group: &str, key: &str) -> SchedulerResult<Option<IteratorRecord>>;

    /// 删除记录及其租约，返回记录是否存在
    async fn remove_record(&self, group: &str, key: &str) -> SchedulerResult<bool>;

    /// 查询到期记录：未禁用、已到下次执行时间且没有未过期租约。
    ///
    /// 按优先级降序、创建时间升序、插入顺序排序。
    async fn due_records(
        &self,
        group: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<IteratorRecord>>;

    /// 写回一次执行后的调度进度
    async fn update_schedule(
        &self,
        group: &str,
        key: &str,
        next_eligible_at: DateTime<Utc>,
        failed_attempts: u32,
        disabled: bool,
    ) -> SchedulerResult<()>;

    /// 手动恢复被禁用的记录：清零失败次数并立即可执行
    async fn reset_record(&self, group: &str, key: &str, now: DateTime<Utc>) -> SchedulerResult<bool>;

    /// 原子地获取租约。键上存在未过期租约时返回 `None`
    async fn try_acquire(
        &self,
        group: &str,
        key: &str,
        owner: &str,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<Lease>>;

    /// 按凭证释放租约，凭证不匹配（已过期被他人获取）时返回 `false`
    async fn release(&self, lease: &Lease) -> SchedulerResult<bool>;

    async fn get_lease(&self, group: &str, key: &str) -> SchedulerResult<Option<Lease>>;
}
