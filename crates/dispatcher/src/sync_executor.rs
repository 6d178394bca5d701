use std::sync::Arc;
use std::time::{Duration, Instant};

use delegate_core::models::{DelegateTask, TaskExecutionResponse, TaskResponseData};
use delegate_core::traits::{PendingResponse, TaskTransport};
use delegate_core::{SchedulerError, SchedulerResult};
use metrics::{counter, histogram};
use tracing::{debug, warn};

/// 同步任务执行器
///
/// 下发任务包后在任务超时时间内等待Delegate的响应，并把响应归类为
/// 成功结果或错误。超时与等待中断属于本地传输错误，不在这一层重试。
pub struct SyncTaskExecutor {
    transport: Arc<dyn TaskTransport>,
    default_timeout: Duration,
}

impl SyncTaskExecutor {
    pub fn new(transport: Arc<dyn TaskTransport>, default_timeout: Duration) -> Self {
        Self {
            transport,
            default_timeout,
        }
    }

    pub fn transport(&self) -> &Arc<dyn TaskTransport> {
        &self.transport
    }

    /// 执行同步任务并等待结果
    ///
    /// `error_context` 会作为远端错误信息的前缀，例如 `"Deploy failed"`。
    pub async fn execute_sync_task(
        &self,
        task: &DelegateTask,
        error_context: &str,
    ) -> SchedulerResult<TaskExecutionResponse> {
        let pending = self.transport.send(task.to_package()).await?;
        self.await_response(task, pending, error_context).await
    }

    /// 等待已下发任务的响应
    pub async fn await_response(
        &self,
        task: &DelegateTask,
        pending: PendingResponse,
        error_context: &str,
    ) -> SchedulerResult<TaskExecutionResponse> {
        let timeout = if task.timeout_ms == 0 {
            self.default_timeout
        } else {
            task.timeout()
        };
        let started = Instant::now();

        let bytes = match tokio::time::timeout(timeout, pending).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(_)) => {
                counter!("delegate_sync_task_interrupted_total").increment(1);
                return Err(SchedulerError::Request(format!(
                    "等待任务 {} 的响应被中断",
                    task.id
                )));
            }
            Err(_) => {
                self.transport.cancel(&task.id).await;
                counter!("delegate_sync_task_timeout_total").increment(1);
                warn!(task_id = %task.id, "同步任务等待超时: {:?}", timeout);
                return Err(SchedulerError::ExecutionTimeout);
            }
        };
        histogram!("delegate_sync_task_wait_ms").record(started.elapsed().as_millis() as f64);

        let response = TaskResponseData::decode(&bytes)?;
        debug!(task_id = %task.id, "收到同步任务响应");
        classify_response(response, error_context)
    }
}

fn with_context(error_context: &str, message: &str) -> String {
    if error_context.is_empty() {
        message.to_string()
    } else {
        format!("{error_context} - {message}")
    }
}

/// 把Delegate响应归类为执行结果或错误
pub fn classify_response(
    response: TaskResponseData,
    error_context: &str,
) -> SchedulerResult<TaskExecutionResponse> {
    match response {
        TaskResponseData::ErrorNotify {
            error_message,
            error_code,
            ..
        } => Err(SchedulerError::server(
            with_context(error_context, &error_message),
            error_code,
        )),
        TaskResponseData::RemoteException { message } => Err(SchedulerError::server(
            with_context(error_context, &message),
            None,
        )),
        TaskResponseData::Execution(execution) if execution.is_success() => Ok(execution),
        TaskResponseData::Execution(execution) => {
            let message = execution
                .error_message
                .unwrap_or_else(|| format!("执行状态: {:?}", execution.status));
            Err(SchedulerError::server(
                with_context(error_context, &message),
                execution.error_code,
            ))
        }
        TaskResponseData::Unknown => Err(SchedulerError::server(
            with_context(error_context, "未知的响应类型"),
            None,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delegate_core::models::{CommandExecutionStatus, TaskType};
    use delegate_testing_utils::{MockReply, MockTaskTransport};

    fn executor(transport: MockTaskTransport) -> SyncTaskExecutor {
        SyncTaskExecutor::new(Arc::new(transport), Duration::from_secs(20))
    }

    #[tokio::test]
    async fn test_error_notify_message_contains_context() {
        let transport = MockTaskTransport::replying(&TaskResponseData::error_notify("boom"));
        let task = DelegateTask::new("acc", TaskType::Http, Vec::new());

        let err = executor(transport)
            .execute_sync_task(&task, "Deploy failed")
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Server { .. }));
        assert!(err.to_string().contains("Deploy failed - boom"));
    }

    #[tokio::test]
    async fn test_success_returns_execution_response() {
        let transport = MockTaskTransport::replying(&TaskResponseData::Execution(
            TaskExecutionResponse::success(b"result".to_vec()),
        ));
        let task = DelegateTask::new("acc", TaskType::Http, b"params".to_vec());

        let response = executor(transport.clone())
            .execute_sync_task(&task, "ctx")
            .await
            .unwrap();
        assert_eq!(response.payload, b"result".to_vec());
        assert_eq!(transport.sent_packages()[0].parameters, b"params".to_vec());
    }

    #[tokio::test]
    async fn test_failed_status_carries_code() {
        let transport = MockTaskTransport::replying(&TaskResponseData::Execution(
            TaskExecutionResponse::failure("permission denied", Some("ACCESS_DENIED".into())),
        ));
        let task = DelegateTask::new("acc", TaskType::GitFetch, Vec::new());

        let err = executor(transport)
            .execute_sync_task(&task, "Git fetch failed")
            .await
            .unwrap_err();
        match err {
            SchedulerError::Server { message, code } => {
                assert_eq!(message, "Git fetch failed - permission denied");
                assert_eq!(code.as_deref(), Some("ACCESS_DENIED"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let transport = MockTaskTransport::new(MockReply::Hold);
        let mut task = DelegateTask::new("acc", TaskType::Http, Vec::new());
        task.timeout_ms = 20;

        let err = executor(transport).execute_sync_task(&task, "ctx").await.unwrap_err();
        assert!(matches!(err, SchedulerError::ExecutionTimeout));
    }

    #[tokio::test]
    async fn test_interrupted_wait() {
        let transport = MockTaskTransport::new(MockReply::Interrupt);
        let task = DelegateTask::new("acc", TaskType::Http, Vec::new());

        let err = executor(transport).execute_sync_task(&task, "ctx").await.unwrap_err();
        assert!(matches!(err, SchedulerError::Request(_)));
    }

    #[tokio::test]
    async fn test_undecodable_response() {
        let transport = MockTaskTransport::new(MockReply::Bytes(b"not json".to_vec()));
        let task = DelegateTask::new("acc", TaskType::Http, Vec::new());

        let err = executor(transport).execute_sync_task(&task, "ctx").await.unwrap_err();
        assert!(matches!(err, SchedulerError::Serialization(_)));
    }

    #[test]
    fn test_classify_remote_exception_and_unknown() {
        let err = classify_response(
            TaskResponseData::RemoteException {
                message: "NullPointer".into(),
            },
            "Validation failed",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Validation failed - NullPointer");

        assert!(classify_response(TaskResponseData::Unknown, "ctx").is_err());

        let running = TaskExecutionResponse {
            status: CommandExecutionStatus::Running,
            error_message: None,
            error_code: None,
            payload: Vec::new(),
        };
        assert!(classify_response(TaskResponseData::Execution(running), "").is_err());
    }
}
