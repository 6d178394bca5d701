use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use delegate_core::config::WorkflowMonitorConfig;
use delegate_core::models::{ExecutionStatus, IteratorRecord, WorkflowExecution};
use delegate_core::traits::{ExecutionInterruptCallback, WorkflowExecutionRepository};
use delegate_core::SchedulerResult;

use crate::iterator::{IterationHandler, IterationOutcome};

pub const WORKFLOW_EXECUTION_MONITOR_GROUP: &str = "workflow_execution_monitor";

/// 工作流执行监控
///
/// 长时间没有进展且没有进行中子状态的执行会被强制结束：超过最大存活时间的
/// 标记为过期，否则标记为错误。
pub struct WorkflowExecutionMonitorHandler {
    executions: Arc<dyn WorkflowExecutionRepository>,
    callback: Arc<dyn ExecutionInterruptCallback>,
    inactivity_threshold: Duration,
    max_execution_age: Duration,
}

impl WorkflowExecutionMonitorHandler {
    pub fn new(
        executions: Arc<dyn WorkflowExecutionRepository>,
        callback: Arc<dyn ExecutionInterruptCallback>,
        config: &WorkflowMonitorConfig,
    ) -> Self {
        Self {
            executions,
            callback,
            inactivity_threshold: Duration::seconds(config.inactivity_threshold_seconds as i64),
            max_execution_age: Duration::seconds(config.max_execution_age_seconds as i64),
        }
    }

    /// 判断执行是否需要被强制结束，返回目标状态
    pub fn evaluate_at(&self, execution: &WorkflowExecution, now: DateTime<Utc>) -> Option<ExecutionStatus> {
        if execution.status.is_terminal() || execution.active_sub_states > 0 {
            return None;
        }
        if now - execution.last_updated_at <= self.inactivity_threshold {
            return None;
        }
        if now - execution.created_at > self.max_execution_age {
            Some(ExecutionStatus::Expired)
        } else {
            Some(ExecutionStatus::Error)
        }
    }
}

#[async_trait]
impl IterationHandler for WorkflowExecutionMonitorHandler {
    fn group(&self) -> &str {
        WORKFLOW_EXECUTION_MONITOR_GROUP
    }

    async fn handle(&self, record: &IteratorRecord) -> SchedulerResult<IterationOutcome> {
        let Some(execution) = self.executions.get(&record.key).await? else {
            debug!("工作流执行 {} 不存在，停止监控", record.key);
            return Ok(IterationOutcome::Finished);
        };
        if execution.status.is_terminal() {
            return Ok(IterationOutcome::Finished);
        }

        let Some(status) = self.evaluate_at(&execution, Utc::now()) else {
            return Ok(IterationOutcome::Reschedule);
        };
        let reason = match status {
            ExecutionStatus::Expired => "工作流执行超过最大存活时间",
            _ => "工作流执行长时间没有进展",
        };
        warn!("强制结束工作流执行 {}: {:?}", execution.id, status);
        self.callback
            .force_terminal(&execution.account_id, &execution.id, status, reason)
            .await?;
        Ok(IterationOutcome::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delegate_infrastructure::InMemoryWorkflowExecutionRepository;
    use delegate_testing_utils::{IteratorRecordBuilder, RecordingInterruptCallback, WorkflowExecutionBuilder};

    struct Fixture {
        handler: WorkflowExecutionMonitorHandler,
        executions: Arc<InMemoryWorkflowExecutionRepository>,
        callback: RecordingInterruptCallback,
    }

    fn fixture() -> Fixture {
        let executions = Arc::new(InMemoryWorkflowExecutionRepository::new());
        let callback = RecordingInterruptCallback::new();
        let config = WorkflowMonitorConfig {
            inactivity_threshold_seconds: 30,
            ..Default::default()
        };
        Fixture {
            handler: WorkflowExecutionMonitorHandler::new(
                executions.clone(),
                Arc::new(callback.clone()),
                &config,
            ),
            executions,
            callback,
        }
    }

    fn record(id: &str) -> IteratorRecord {
        IteratorRecordBuilder::new(WORKFLOW_EXECUTION_MONITOR_GROUP, id).build()
    }

    #[tokio::test]
    async fn test_inactive_young_execution_becomes_error() {
        let fx = fixture();
        fx.executions
            .insert(
                WorkflowExecutionBuilder::new("e1")
                    .created_ago(Duration::seconds(45))
                    .updated_ago(Duration::seconds(45))
                    .build(),
            )
            .await;

        let outcome = fx.handler.handle(&record("e1")).await.unwrap();
        assert_eq!(outcome, IterationOutcome::Finished);

        let interrupts = fx.callback.interrupts();
        assert_eq!(interrupts.len(), 1);
        assert_eq!(interrupts[0].0, "e1");
        assert_eq!(interrupts[0].1, ExecutionStatus::Error);
    }

    #[tokio::test]
    async fn test_inactive_old_execution_becomes_expired() {
        let fx = fixture();
        fx.executions
            .insert(
                WorkflowExecutionBuilder::new("e1")
                    .created_ago(Duration::days(4))
                    .updated_ago(Duration::seconds(45))
                    .build(),
            )
            .await;

        fx.handler.handle(&record("e1")).await.unwrap();
        assert_eq!(fx.callback.interrupts()[0].1, ExecutionStatus::Expired);
    }

    #[tokio::test]
    async fn test_active_sub_states_keep_execution_alive() {
        let fx = fixture();
        fx.executions
            .insert(
                WorkflowExecutionBuilder::new("e1")
                    .with_active_sub_states(1)
                    .updated_ago(Duration::seconds(45))
                    .build(),
            )
            .await;
        fx.executions
            .insert(WorkflowExecutionBuilder::new("e2").updated_ago(Duration::seconds(10)).build())
            .await;

        assert_eq!(fx.handler.handle(&record("e1")).await.unwrap(), IterationOutcome::Reschedule);
        assert_eq!(fx.handler.handle(&record("e2")).await.unwrap(), IterationOutcome::Reschedule);
        assert!(fx.callback.interrupts().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_or_missing_execution_finishes() {
        let fx = fixture();
        fx.executions
            .insert(
                WorkflowExecutionBuilder::new("e1")
                    .with_status(ExecutionStatus::Success)
                    .updated_ago(Duration::hours(1))
                    .build(),
            )
            .await;

        assert_eq!(fx.handler.handle(&record("e1")).await.unwrap(), IterationOutcome::Finished);
        assert_eq!(fx.handler.handle(&record("missing")).await.unwrap(), IterationOutcome::Finished);
        assert!(fx.callback.interrupts().is_empty());
    }

    #[test]
    fn test_evaluate_at_threshold_boundary() {
        let fx = fixture();
        let now = Utc::now();
        let mut execution = WorkflowExecutionBuilder::new("e1").build();
        execution.created_at = now - Duration::seconds(30);
        execution.last_updated_at = now - Duration::seconds(30);
        assert_eq!(fx.handler.evaluate_at(&execution, now), None);

        execution.last_updated_at = now - Duration::seconds(31);
        assert_eq!(fx.handler.evaluate_at(&execution, now), Some(ExecutionStatus::Error));
    }
}
