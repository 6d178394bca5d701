use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use delegate_core::models::{ExecutionStatus, WorkflowExecution};
use delegate_core::traits::{ExecutionInterruptCallback, WorkflowExecutionRepository};
use delegate_core::{SchedulerError, SchedulerResult};
use tokio::sync::RwLock;
use tracing::info;

/// 内存工作流执行仓储，同时负责强制结束执行
#[derive(Debug, Default)]
pub struct InMemoryWorkflowExecutionRepository {
    executions: RwLock<HashMap<String, WorkflowExecution>>,
}

impl InMemoryWorkflowExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, execution: WorkflowExecution) {
        self.executions
            .write()
            .await
            .insert(execution.id.clone(), execution);
    }
}

#[async_trait]
impl WorkflowExecutionRepository for InMemoryWorkflowExecutionRepository {
    async fn get(&self, execution_id: &str) -> SchedulerResult<Option<WorkflowExecution>> {
        Ok(self.executions.read().await.get(execution_id).cloned())
    }
}

#[async_trait]
impl ExecutionInterruptCallback for InMemoryWorkflowExecutionRepository {
    async fn force_terminal(
        &self,
        account_id: &str,
        execution_id: &str,
        status: ExecutionStatus,
        reason: &str,
    ) -> SchedulerResult<()> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(execution_id)
            .filter(|execution| execution.account_id == account_id)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: execution_id.to_string(),
            })?;

        if execution.status.is_terminal() {
            return Ok(());
        }
        execution.status = status;
        execution.last_updated_at = Utc::now();
        info!("工作流执行 {} 被强制结束为 {:?}: {}", execution_id, status, reason);
        Ok(())
    }
}
