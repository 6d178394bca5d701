use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delegate_core::models::{DelegateTask, DelegateTaskStatus};
use delegate_core::traits::DelegateTaskRepository;
use delegate_core::SchedulerResult;
use tokio::sync::RwLock;

/// 内存委派任务仓储
#[derive(Debug, Default)]
pub struct InMemoryDelegateTaskRepository {
    tasks: RwLock<HashMap<String, DelegateTask>>,
}

impl InMemoryDelegateTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    fn owned_mut<'a>(
        tasks: &'a mut HashMap<String, DelegateTask>,
        account_id: &str,
        task_id: &str,
    ) -> Option<&'a mut DelegateTask> {
        tasks
            .get_mut(task_id)
            .filter(|task| task.account_id == account_id)
    }
}

#[async_trait]
impl DelegateTaskRepository for InMemoryDelegateTaskRepository {
    async fn save(&self, task: &DelegateTask) -> SchedulerResult<()> {
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get(&self, account_id: &str, task_id: &str) -> SchedulerResult<Option<DelegateTask>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .get(task_id)
            .filter(|task| task.account_id == account_id)
            .cloned())
    }

    async fn delete(&self, account_id: &str, task_id: &str) -> SchedulerResult<bool> {
        let mut tasks = self.tasks.write().await;
        if Self::owned_mut(&mut tasks, account_id, task_id).is_none() {
            return Ok(false);
        }
        Ok(tasks.remove(task_id).is_some())
    }

    async fn assign_if_unassigned(
        &self,
        account_id: &str,
        task_id: &str,
        delegate_id: &str,
    ) -> SchedulerResult<Option<DelegateTask>> {
        let mut tasks = self.tasks.write().await;
        match Self::owned_mut(&mut tasks, account_id, task_id) {
            Some(task) if task.is_assignable() => {
                task.delegate_id = Some(delegate_id.to_string());
                task.status = DelegateTaskStatus::Assigned;
                Ok(Some(task.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn start_if_assigned(
        &self,
        account_id: &str,
        task_id: &str,
        delegate_id: &str,
        attempt: u32,
    ) -> SchedulerResult<Option<DelegateTask>> {
        let mut tasks = self.tasks.write().await;
        match Self::owned_mut(&mut tasks, account_id, task_id) {
            Some(task)
                if task.status == DelegateTaskStatus::Assigned
                    && task.is_running_on(delegate_id, attempt) =>
            {
                task.status = DelegateTaskStatus::Started;
                Ok(Some(task.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_status_if(
        &self,
        account_id: &str,
        task_id: &str,
        expected: &[DelegateTaskStatus],
        status: DelegateTaskStatus,
        error_message: Option<String>,
    ) -> SchedulerResult<Option<DelegateTask>> {
        let mut tasks = self.tasks.write().await;
        match Self::owned_mut(&mut tasks, account_id, task_id) {
            Some(task) if expected.contains(&task.status) => {
                task.status = status;
                if error_message.is_some() {
                    task.error_message = error_message;
                }
                Ok(Some(task.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn add_validating_delegate(
        &self,
        account_id: &str,
        task_id: &str,
        delegate_id: &str,
    ) -> SchedulerResult<Option<DelegateTask>> {
        let mut tasks = self.tasks.write().await;
        Ok(Self::owned_mut(&mut tasks, account_id, task_id).map(|task| {
            task.validating_delegate_ids.insert(delegate_id.to_string());
            task.clone()
        }))
    }

    async fn add_validation_complete_delegate(
        &self,
        account_id: &str,
        task_id: &str,
        delegate_id: &str,
    ) -> SchedulerResult<Option<DelegateTask>> {
        let mut tasks = self.tasks.write().await;
        Ok(Self::owned_mut(&mut tasks, account_id, task_id).map(|task| {
            task.validation_complete_delegate_ids
                .insert(delegate_id.to_string());
            task.clone()
        }))
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<DelegateTask>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|task| !task.status.is_terminal() && task.is_expired(now))
            .cloned()
            .collect())
    }
}
