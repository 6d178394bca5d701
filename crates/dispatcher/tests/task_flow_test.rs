use std::sync::{Arc, Mutex};

use delegate_core::config::{DispatcherConfig, RetryConfig};
use delegate_core::models::{TaskExecutionResponse, TaskResponseData, TaskType};
use delegate_core::SchedulerError;
use delegate_dispatcher::{DelegateCache, DelegateTaskService, RetryCoordinator, TaskAcquisition};
use delegate_infrastructure::{InMemoryDelegateTaskRepository, InMemoryTaskTransport};
use delegate_testing_utils::{DelegateInfoBuilder, DelegateTaskBuilder};

const DELEGATES: [&str; 2] = ["d1", "d2"];

fn service(transport: Arc<InMemoryTaskTransport>, retry: RetryConfig) -> Arc<DelegateTaskService> {
    let cache = Arc::new(DelegateCache::default());
    for id in DELEGATES {
        cache.register(DelegateInfoBuilder::new(id).build());
    }
    Arc::new(DelegateTaskService::new(
        Arc::new(InMemoryDelegateTaskRepository::new()),
        cache,
        transport,
        Arc::new(RetryCoordinator::from_config(&retry)),
        DispatcherConfig::default(),
    ))
}

type Executions = Arc<Mutex<Vec<(String, u32)>>>;

/// 模拟Delegate侧：领取每个下发的任务包，d1 总是失败，其余成功
fn spawn_delegates(
    service: Arc<DelegateTaskService>,
    mut outbound: tokio::sync::mpsc::UnboundedReceiver<delegate_core::models::TaskPackage>,
) -> (tokio::task::JoinHandle<()>, Executions) {
    let executions: Executions = Arc::new(Mutex::new(Vec::new()));
    let recorded = executions.clone();
    let handle = tokio::spawn(async move {
        while let Some(package) = outbound.recv().await {
            for delegate_id in DELEGATES {
                let acquired = service
                    .acquire_task(&package.account_id, delegate_id, &package.task_id)
                    .await
                    .unwrap();
                let Some(TaskAcquisition::Execute(assigned)) = acquired else {
                    continue;
                };
                recorded
                    .lock()
                    .unwrap()
                    .push((delegate_id.to_string(), assigned.attempt));
                assert!(service
                    .start_task(&package.account_id, delegate_id, &package.task_id, assigned.attempt)
                    .await
                    .unwrap());
                let response = if delegate_id == "d1" {
                    TaskResponseData::error_notify("connection refused")
                } else {
                    TaskResponseData::Execution(TaskExecutionResponse::success(b"done".to_vec()))
                };
                service
                    .process_response(
                        &package.account_id,
                        &package.task_id,
                        delegate_id,
                        assigned.attempt,
                        response,
                    )
                    .await
                    .unwrap();
                break;
            }
        }
    });
    (handle, executions)
}

#[tokio::test]
async fn test_sync_task_succeeds_on_other_delegate_after_failure() {
    let (transport, outbound) = InMemoryTaskTransport::new();
    let transport = Arc::new(transport);
    let service = service(transport.clone(), RetryConfig::default());
    let (delegates, executions) = spawn_delegates(service.clone(), outbound);

    let task = DelegateTaskBuilder::new()
        .with_id("deploy-1")
        .with_task_type(TaskType::ShellScript)
        .with_parameters(b"echo hi")
        .build();
    let response = service.execute_task(task, "Deploy failed").await.unwrap();
    assert_eq!(response.payload, b"done".to_vec());

    assert_eq!(
        executions.lock().unwrap().clone(),
        vec![("d1".to_string(), 1), ("d2".to_string(), 2)]
    );
    assert_eq!(transport.pending_count().await, 0);
    delegates.abort();
}

#[tokio::test]
async fn test_sync_task_fails_when_attempts_exhausted() {
    let (transport, outbound) = InMemoryTaskTransport::new();
    let transport = Arc::new(transport);
    let service = service(
        transport.clone(),
        RetryConfig {
            max_task_attempts: 1,
            ..Default::default()
        },
    );
    let (delegates, _) = spawn_delegates(service.clone(), outbound);

    let task = DelegateTaskBuilder::new().with_id("deploy-2").with_whitelist(&["d1"]).build();
    let err = service.execute_task(task, "Deploy failed").await.unwrap_err();
    assert!(matches!(err, SchedulerError::Server { .. }));
    assert_eq!(err.to_string(), "Deploy failed - connection refused");
    delegates.abort();
}
