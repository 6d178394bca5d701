use std::collections::HashMap;

use async_trait::async_trait;
use delegate_core::models::TaskPackage;
use delegate_core::traits::{PendingResponse, TaskTransport};
use delegate_core::{SchedulerError, SchedulerResult};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

/// 进程内任务下发通道
///
/// 任务包写入无界通道供Delegate侧消费，响应按任务 id 交回等待者。
/// 同一任务重复下发时替换旧的等待者，旧等待者收到中断。
#[derive(Debug)]
pub struct InMemoryTaskTransport {
    outbound: mpsc::UnboundedSender<TaskPackage>,
    pending: Mutex<HashMap<String, oneshot::Sender<Vec<u8>>>>,
}

impl InMemoryTaskTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskPackage>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        (
            Self {
                outbound,
                pending: Mutex::new(HashMap::new()),
            },
            receiver,
        )
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[async_trait]
impl TaskTransport for InMemoryTaskTransport {
    async fn send(&self, package: TaskPackage) -> SchedulerResult<PendingResponse> {
        let (tx, rx) = oneshot::channel();
        let task_id = package.task_id.clone();
        self.pending.lock().await.insert(task_id.clone(), tx);

        if self.outbound.send(package).is_err() {
            self.pending.lock().await.remove(&task_id);
            return Err(SchedulerError::Request(format!(
                "任务下发通道已关闭: {task_id}"
            )));
        }
        debug!("任务包已下发: {}", task_id);
        Ok(rx)
    }

    async fn broadcast(&self, package: TaskPackage) -> SchedulerResult<()> {
        let task_id = package.task_id.clone();
        self.outbound.send(package).map_err(|_| {
            SchedulerError::Request(format!("任务下发通道已关闭: {task_id}"))
        })?;
        debug!("任务包已广播: {}", task_id);
        Ok(())
    }

    async fn deliver_response(&self, task_id: &str, response: Vec<u8>) -> bool {
        let Some(waiter) = self.pending.lock().await.remove(task_id) else {
            debug!("任务 {} 没有等待者，忽略响应", task_id);
            return false;
        };
        if waiter.send(response).is_err() {
            warn!("任务 {} 的等待者已放弃等待", task_id);
            return false;
        }
        true
    }

    async fn cancel(&self, task_id: &str) -> bool {
        self.pending.lock().await.remove(task_id).is_some()
    }
}
