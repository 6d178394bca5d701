use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::models::TaskPackage;
use crate::SchedulerResult;

/// 等待Delegate响应的句柄，发送端被丢弃表示等待被中断
pub type PendingResponse = oneshot::Receiver<Vec<u8>>;

/// 任务包的下发通道
///
/// 通过任务 id 关联请求与响应。
#[async_trait]
pub trait TaskTransport: Send + Sync {
    /// 下发任务包并返回响应句柄
    async fn send(&self, package: TaskPackage) -> SchedulerResult<PendingResponse>;

    /// 只下发任务包，不登记等待者（异步任务与重试时使用）
    async fn broadcast(&self, package: TaskPackage) -> SchedulerResult<()>;

    /// 将Delegate的原始响应交给等待者，没有等待者时返回 `false`
    async fn deliver_response(&self, task_id: &str, response: Vec<u8>) -> bool;

    /// 放弃等待，等待者会收到中断
    async fn cancel(&self, task_id: &str) -> bool;
}
