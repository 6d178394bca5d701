use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use delegate_core::models::IteratorRecord;
use delegate_core::traits::ResourceConstraintService;
use delegate_core::SchedulerResult;

use crate::iterator::{IterationHandler, IterationOutcome};

pub const RESOURCE_CONSTRAINT_BACKUP_GROUP: &str = "resource_constraint_backup";

/// 资源约束兜底刷新
///
/// 记录的 key 是约束 id。先刷新仍在占用的许可，再尝试放行被阻塞的申请。
pub struct ResourceConstraintBackupHandler {
    service: Arc<dyn ResourceConstraintService>,
}

impl ResourceConstraintBackupHandler {
    pub fn new(service: Arc<dyn ResourceConstraintService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl IterationHandler for ResourceConstraintBackupHandler {
    fn group(&self) -> &str {
        RESOURCE_CONSTRAINT_BACKUP_GROUP
    }

    async fn handle(&self, record: &IteratorRecord) -> SchedulerResult<IterationOutcome> {
        let active = self
            .service
            .update_active_constraints(&record.account_id, &record.key)
            .await?;
        let unblocked = self
            .service
            .update_blocked_constraints(&record.account_id, &record.key)
            .await?;
        debug!(
            "资源约束 {} 刷新完成: 释放 {} 个，放行 {} 个",
            record.key, active, unblocked
        );
        Ok(IterationOutcome::Reschedule)
    }
}
