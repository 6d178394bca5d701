use std::sync::Arc;

use chrono::{DateTime, Utc};
use delegate_core::models::{
    Capability, CapabilityEvaluationMode, DelegateTask, SelectionLog, SelectionReason,
};
use tracing::debug;

use crate::delegate_cache::DelegateCache;

/// 任务分配判定器
///
/// 判定只读取 [`DelegateCache`] 的快照，不做任何IO，对同一份快照结果确定。
/// 无法解析的能力一律视为不满足。
#[derive(Debug, Clone)]
pub struct TaskAssignmentEvaluator {
    cache: Arc<DelegateCache>,
}

/// 单个能力对某个Delegate的判定
enum CapabilityVerdict {
    Satisfied,
    Pending,
    Unsatisfied,
}

impl TaskAssignmentEvaluator {
    pub fn new(cache: Arc<DelegateCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<DelegateCache> {
        &self.cache
    }

    /// 判断Delegate能否执行任务，并在选择日志中追加一条记录
    pub fn can_assign(&self, log: &mut SelectionLog, delegate_id: &str, task: &DelegateTask) -> bool {
        self.can_assign_at(log, delegate_id, task, Utc::now())
    }

    pub fn can_assign_at(
        &self,
        log: &mut SelectionLog,
        delegate_id: &str,
        task: &DelegateTask,
        now: DateTime<Utc>,
    ) -> bool {
        let (eligible, reason) = self.evaluate(delegate_id, task, now);
        debug!(
            task_id = %task.id,
            delegate_id = %delegate_id,
            eligible,
            reason = ?reason,
            "分配判定"
        );
        log.record(delegate_id, eligible, reason);
        eligible
    }

    /// 任务未指定白名单，或Delegate在白名单中
    pub fn is_whitelisted(&self, task: &DelegateTask, delegate_id: &str) -> bool {
        task.delegate_whitelist.is_empty()
            || task.delegate_whitelist.iter().any(|id| id == delegate_id)
    }

    /// 是否还有需要该Delegate验证的能力
    pub fn should_validate(&self, task: &DelegateTask, delegate_id: &str) -> bool {
        let now = Utc::now();
        task.capabilities.iter().any(|capability| {
            capability.evaluation_mode() == CapabilityEvaluationMode::Agent
                && capability
                    .key()
                    .is_some_and(|key| self.cache.capability_result(delegate_id, &key, now).is_none())
        })
    }

    /// 账号下所有Delegate的判定结果，日志按Delegate id 顺序记录
    pub fn eligible_delegates(&self, task: &DelegateTask) -> (Vec<String>, SelectionLog) {
        let mut log = SelectionLog::new(task.id.clone());
        let now = Utc::now();
        let eligible = self
            .cache
            .delegates_for_account(&task.account_id)
            .into_iter()
            .filter(|delegate| self.can_assign_at(&mut log, &delegate.id, task, now))
            .map(|delegate| delegate.id)
            .collect();
        (eligible, log)
    }

    fn evaluate(&self, delegate_id: &str, task: &DelegateTask, now: DateTime<Utc>) -> (bool, SelectionReason) {
        let Some(delegate) = self.cache.get(delegate_id) else {
            return (false, SelectionReason::DelegateNotFound);
        };
        if !delegate.is_enabled() {
            return (false, SelectionReason::DelegateDisabled);
        }
        if delegate.account_id != task.account_id {
            return (false, SelectionReason::AccountMismatch);
        }
        if task.excluded_delegate_ids.contains(delegate_id) {
            return (false, SelectionReason::Excluded);
        }

        let mut pending = false;
        for capability in &task.capabilities {
            match self.check_capability(capability, delegate_id, &delegate.tags, now) {
                CapabilityVerdict::Satisfied => {}
                CapabilityVerdict::Pending => pending = true,
                CapabilityVerdict::Unsatisfied => {
                    let description = capability
                        .key()
                        .unwrap_or_else(|| "<invalid capability>".to_string());
                    return (
                        false,
                        SelectionReason::CapabilityUnmatched {
                            capability: description,
                        },
                    );
                }
            }
        }

        if pending {
            (true, SelectionReason::PendingValidation)
        } else {
            (true, SelectionReason::CapabilityMatched)
        }
    }

    fn check_capability(
        &self,
        capability: &Capability,
        delegate_id: &str,
        tags: &[String],
        now: DateTime<Utc>,
    ) -> CapabilityVerdict {
        let Some(key) = capability.key() else {
            return CapabilityVerdict::Unsatisfied;
        };
        match capability.evaluation_mode() {
            CapabilityEvaluationMode::Manager => {
                if capability.matches_tags(tags) {
                    CapabilityVerdict::Satisfied
                } else {
                    CapabilityVerdict::Unsatisfied
                }
            }
            CapabilityEvaluationMode::Agent => match self.cache.capability_result(delegate_id, &key, now) {
                Some(true) => CapabilityVerdict::Satisfied,
                Some(false) => CapabilityVerdict::Unsatisfied,
                None => CapabilityVerdict::Pending,
            },
        }
    }
}
