use std::io::Write;
use std::time::Duration;

use chrono::Utc;
use delegate_core::models::{
    Capability, CapabilityCheckResult, ExecutionStatus, PerpetualTaskClientContext, PerpetualTaskType,
    TaskResponseData,
};
use delegate_core::traits::{LeaseStore, WorkflowExecutionRepository};
use delegate_core::{AppConfig, SchedulerError};
use delegate_dispatcher::{BackoffPolicy, TaskAcquisition};
use delegate_scheduler::Application;
use delegate_testing_utils::{DelegateInfoBuilder, DelegateTaskBuilder, WorkflowExecutionBuilder};

async fn in_memory_app() -> Application {
    Application::new(AppConfig::default()).await.unwrap()
}

#[tokio::test]
async fn test_selection_log_lists_every_candidate() {
    let app = in_memory_app().await;
    let tasks = app.task_service();
    tasks.register_delegate(DelegateInfoBuilder::new("w1").with_tags(&["gpu"]).build());
    tasks.register_delegate(DelegateInfoBuilder::new("w2").with_tags(&["cpu"]).build());

    let task = DelegateTaskBuilder::new()
        .with_capability(Capability::selector(["gpu"]))
        .build();
    let (eligible, log) = tasks.evaluator().eligible_delegates(&task);

    assert_eq!(eligible, vec!["w1".to_string()]);
    assert_eq!(log.len(), 2);
    assert!(log.entries_for("w1").all(|entry| entry.eligible));
    assert!(log.entries_for("w2").all(|entry| !entry.eligible));
}

#[tokio::test]
async fn test_sync_failure_reaches_caller_with_context() {
    let app = in_memory_app().await;
    let tasks = app.task_service();
    tasks.register_delegate(DelegateInfoBuilder::new("d1").build());
    let mut stream = app.take_task_stream().await.unwrap();

    // 唯一的Delegate失败后没有可重试的对象，任务直接放弃
    let delegate_side = tasks.clone();
    let delegate = tokio::spawn(async move {
        while let Some(package) = stream.recv().await {
            let acquired = delegate_side
                .acquire_task(&package.account_id, "d1", &package.task_id)
                .await
                .unwrap();
            if let Some(TaskAcquisition::Execute(assigned)) = acquired {
                delegate_side
                    .process_response(
                        &assigned.account_id,
                        &assigned.task_id,
                        "d1",
                        assigned.attempt,
                        TaskResponseData::error_notify("boom"),
                    )
                    .await
                    .unwrap();
            }
        }
    });

    let task = DelegateTaskBuilder::new().build();
    let task_id = task.id.clone();
    let err = tokio::time::timeout(Duration::from_secs(5), tasks.execute_task(task, "Deploy failed"))
        .await
        .unwrap()
        .unwrap_err();
    delegate.abort();

    assert_eq!(err.to_string(), "Deploy failed - boom");
    assert!(matches!(err, SchedulerError::Server { .. }));
    let stored = tasks.get_task("test-account", &task_id).await;
    assert!(stored.is_ok());
}

#[tokio::test]
async fn test_validation_result_is_remembered_by_cache() {
    let app = in_memory_app().await;
    let tasks = app.task_service();
    tasks.register_delegate(DelegateInfoBuilder::new("d1").build());
    let capability = Capability::http("https://registry.example.com");

    let task = DelegateTaskBuilder::new()
        .with_capability(capability.clone())
        .async_task()
        .build();
    let (queued, _) = tasks.queue_task(task).await.unwrap();

    let acquired = tasks
        .acquire_task(&queued.account_id, "d1", &queued.id)
        .await
        .unwrap();
    assert!(matches!(acquired, Some(TaskAcquisition::Validate(_))));

    let result = CapabilityCheckResult::new("d1", &capability, true).unwrap();
    let assigned = tasks
        .report_connection_results(&queued.account_id, "d1", &queued.id, vec![result])
        .await
        .unwrap();
    assert!(matches!(assigned, Some(TaskAcquisition::Execute(_))));

    // 第二个相同能力的任务不再需要验证
    let second = DelegateTaskBuilder::new()
        .with_capability(capability)
        .async_task()
        .build();
    let (second, _) = tasks.queue_task(second).await.unwrap();
    let acquired = tasks
        .acquire_task(&second.account_id, "d1", &second.id)
        .await
        .unwrap();
    assert!(matches!(acquired, Some(TaskAcquisition::Execute(_))));
}

#[tokio::test]
async fn test_failing_iteration_backs_off_on_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("leases.db");
    let config_path = dir.path().join("delegate-scheduler.toml");
    let mut file = std::fs::File::create(&config_path).unwrap();
    writeln!(
        file,
        "[database]\nurl = \"sqlite://{}?mode=rwc\"\nmax_connections = 2\n\n[retry]\nbase_lease_seconds = 60\nbackoff_multiplier = 2.0",
        db_path.display()
    )
    .unwrap();

    let config = AppConfig::load(config_path.to_str()).unwrap();
    let app = Application::new(config).await.unwrap();
    let backoff = BackoffPolicy::from_config(&app.config().retry);
    let iterator = app.resource_constraint_backup_iterator();

    // 未注册的资源约束会让处理单元失败
    iterator.register_key("rc-missing", "acc-1", 0).await.unwrap();
    let before = Utc::now();
    let report = iterator.run_cycle(before).await.unwrap();
    assert_eq!(report.dispatched, 1);
    report.join().await;

    let record = app
        .lease_store()
        .get_record(iterator.group(), "rc-missing")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.failed_attempts, 1);
    assert!(!record.disabled);
    assert!(backoff.lease_duration(1) > backoff.lease_duration(0));
    let expected = chrono::Duration::from_std(backoff.lease_duration(1)).unwrap();
    assert!(record.next_eligible_at >= before + expected - chrono::Duration::seconds(1));
    assert!(app
        .lease_store()
        .get_lease(iterator.group(), "rc-missing")
        .await
        .unwrap()
        .is_none());

    // 注册约束后重置记录即可恢复正常调度
    app.resource_constraints()
        .register_constraint("acc-1", "rc-missing", 2)
        .await;
    iterator.reset_record("rc-missing").await.unwrap();
    iterator.run_cycle(Utc::now()).await.unwrap().join().await;
    let record = app
        .lease_store()
        .get_record(iterator.group(), "rc-missing")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.failed_attempts, 0);
}

#[tokio::test]
async fn test_stuck_workflow_is_driven_to_error() {
    let app = in_memory_app().await;
    let executions = app.workflow_executions();
    executions
        .insert(
            WorkflowExecutionBuilder::new("exec-1")
                .with_status(ExecutionStatus::Running)
                .updated_ago(chrono::Duration::seconds(45))
                .build(),
        )
        .await;

    let iterator = app.workflow_execution_monitor_iterator();
    iterator.register_key("exec-1", "acc-1", 0).await.unwrap();
    iterator.run_cycle(Utc::now()).await.unwrap().join().await;

    let execution = executions.get("exec-1").await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Error);
    assert!(app
        .lease_store()
        .get_record(iterator.group(), "exec-1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_perpetual_task_creation_is_deduplicated() {
    let app = in_memory_app().await;
    let perpetual_tasks = app.perpetual_tasks();
    let context = PerpetualTaskClientContext::with_client_id("stream-42");

    let first = perpetual_tasks
        .create_task(
            PerpetualTaskType::ArtifactCollection,
            "acc-1",
            context.clone(),
            None,
            false,
            None,
        )
        .await
        .unwrap();
    let second = perpetual_tasks
        .create_task(PerpetualTaskType::ArtifactCollection, "acc-1", context, None, false, None)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(perpetual_tasks.list_tasks("acc-1").await.unwrap().len(), 1);
}
