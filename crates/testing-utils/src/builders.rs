//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use chrono::{DateTime, Duration, Utc};
use delegate_core::models::{
    Capability, DelegateInfo, DelegateStatus, DelegateTask, ExecutionStatus, IteratorRecord,
    TaskType, WorkflowExecution,
};

/// Builder for creating test DelegateTask entities
pub struct DelegateTaskBuilder {
    task: DelegateTask,
}

impl DelegateTaskBuilder {
    pub fn new() -> Self {
        Self {
            task: DelegateTask::new("test-account", TaskType::Http, b"{}".to_vec()),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.task.id = id.to_string();
        self
    }

    pub fn with_account_id(mut self, account_id: &str) -> Self {
        self.task.account_id = account_id.to_string();
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task.task_type = task_type;
        self
    }

    pub fn with_parameters(mut self, parameters: &[u8]) -> Self {
        self.task.parameters = parameters.to_vec();
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.task.capabilities.push(capability);
        self
    }

    pub fn with_whitelist(mut self, delegate_ids: &[&str]) -> Self {
        self.task.delegate_whitelist = delegate_ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn with_excluded(mut self, delegate_id: &str) -> Self {
        self.task.excluded_delegate_ids.insert(delegate_id.to_string());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.task.timeout_ms = timeout_ms;
        self.task.expires_at = self.task.created_at + Duration::milliseconds(timeout_ms as i64);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.task.expires_at = expires_at;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.task.attempt = attempt;
        self
    }

    pub fn async_task(mut self) -> Self {
        self.task.is_async = true;
        self
    }

    pub fn build(self) -> DelegateTask {
        self.task
    }
}

impl Default for DelegateTaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test DelegateInfo entities
pub struct DelegateInfoBuilder {
    delegate: DelegateInfo,
}

impl DelegateInfoBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            delegate: DelegateInfo::new(id, "test-account", format!("{id}.local")),
        }
    }

    pub fn with_account_id(mut self, account_id: &str) -> Self {
        self.delegate.account_id = account_id.to_string();
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.delegate.tags = tags.iter().map(|tag| tag.to_string()).collect();
        self
    }

    pub fn with_status(mut self, status: DelegateStatus) -> Self {
        self.delegate.status = status;
        self
    }

    pub fn build(self) -> DelegateInfo {
        self.delegate
    }
}

/// Builder for creating test IteratorRecord entities
pub struct IteratorRecordBuilder {
    record: IteratorRecord,
}

impl IteratorRecordBuilder {
    pub fn new(group: &str, key: &str) -> Self {
        let mut record = IteratorRecord::new(group, key, "test-account");
        record.next_eligible_at = Utc::now() - Duration::seconds(1);
        Self { record }
    }

    pub fn with_account_id(mut self, account_id: &str) -> Self {
        self.record.account_id = account_id.to_string();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.record.priority = priority;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.record.created_at = created_at;
        self
    }

    pub fn with_failed_attempts(mut self, failed_attempts: u32) -> Self {
        self.record.failed_attempts = failed_attempts;
        self
    }

    pub fn build(self) -> IteratorRecord {
        self.record
    }
}

/// Builder for creating test WorkflowExecution entities
pub struct WorkflowExecutionBuilder {
    execution: WorkflowExecution,
}

impl WorkflowExecutionBuilder {
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            execution: WorkflowExecution {
                id: id.to_string(),
                account_id: "test-account".to_string(),
                status: ExecutionStatus::Running,
                active_sub_states: 0,
                created_at: now,
                last_updated_at: now,
            },
        }
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.execution.status = status;
        self
    }

    pub fn with_active_sub_states(mut self, count: u32) -> Self {
        self.execution.active_sub_states = count;
        self
    }

    pub fn created_ago(mut self, age: Duration) -> Self {
        self.execution.created_at = Utc::now() - age;
        self
    }

    pub fn updated_ago(mut self, age: Duration) -> Self {
        self.execution.last_updated_at = Utc::now() - age;
        self
    }

    pub fn build(self) -> WorkflowExecution {
        self.execution
    }
}
