use std::collections::HashMap;

use async_trait::async_trait;
use delegate_core::models::PerpetualTaskRecord;
use delegate_core::traits::PerpetualTaskRepository;
use delegate_core::SchedulerResult;
use tokio::sync::RwLock;

/// 内存周期任务仓储
#[derive(Debug, Default)]
pub struct InMemoryPerpetualTaskRepository {
    records: RwLock<HashMap<String, PerpetualTaskRecord>>,
}

impl InMemoryPerpetualTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl PerpetualTaskRepository for InMemoryPerpetualTaskRepository {
    async fn save(&self, record: &PerpetualTaskRecord) -> SchedulerResult<()> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn insert_unless_duplicate(&self, record: &PerpetualTaskRecord) -> SchedulerResult<(String, bool)> {
        let mut records = self.records.write().await;
        let existing = records.values().find(|existing| {
            existing.account_id == record.account_id
                && existing.task_type == record.task_type
                && existing.client_context.is_equivalent(&record.client_context)
        });
        if let Some(existing) = existing {
            return Ok((existing.id.clone(), false));
        }

        records.insert(record.id.clone(), record.clone());
        Ok((record.id.clone(), true))
    }

    async fn get(&self, account_id: &str, task_id: &str) -> SchedulerResult<Option<PerpetualTaskRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(task_id)
            .filter(|record| record.account_id == account_id)
            .cloned())
    }

    async fn remove(&self, account_id: &str, task_id: &str) -> SchedulerResult<bool> {
        let mut records = self.records.write().await;
        let owned = records
            .get(task_id)
            .is_some_and(|record| record.account_id == account_id);
        if !owned {
            return Ok(false);
        }
        Ok(records.remove(task_id).is_some())
    }

    async fn list_by_account(&self, account_id: &str) -> SchedulerResult<Vec<PerpetualTaskRecord>> {
        let records = self.records.read().await;
        let mut result: Vec<PerpetualTaskRecord> = records
            .values()
            .filter(|record| record.account_id == account_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(result)
    }
}
