use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use metrics::counter;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use delegate_core::config::IteratorConfig;
use delegate_core::models::TaskPackage;
use delegate_core::traits::LeaseStore;
use delegate_core::AppConfig;
use delegate_dispatcher::handlers::{
    ArtifactCollectionHandler, ResourceConstraintBackupHandler, WorkflowExecutionMonitorHandler,
};
use delegate_dispatcher::{
    BackoffPolicy, DelegateCache, DelegateTaskService, IterationHandler, PerpetualTaskService,
    RecurringIterator, RetryCoordinator,
};
use delegate_infrastructure::{
    DatabaseManager, InMemoryArtifactStreamRepository, InMemoryDelegateTaskRepository,
    InMemoryLeaseStore, InMemoryPerpetualTaskRepository, InMemoryResourceConstraintService,
    InMemoryTaskTransport, InMemoryWorkflowExecutionRepository, SqliteLeaseStore,
};

/// 主应用程序
///
/// 组装存储、任务分发服务、周期任务注册中心和三个周期迭代器。
/// 数据库地址为内存模式时租约存储也放在进程内。
pub struct Application {
    config: AppConfig,
    database: Option<DatabaseManager>,
    lease_store: Arc<dyn LeaseStore>,
    transport: Arc<InMemoryTaskTransport>,
    task_stream: Mutex<Option<mpsc::UnboundedReceiver<TaskPackage>>>,
    task_service: Arc<DelegateTaskService>,
    perpetual_tasks: Arc<PerpetualTaskService>,
    artifact_streams: Arc<InMemoryArtifactStreamRepository>,
    workflow_executions: Arc<InMemoryWorkflowExecutionRepository>,
    resource_constraints: Arc<InMemoryResourceConstraintService>,
    artifact_collection: Arc<RecurringIterator>,
    resource_constraint_backup: Arc<RecurringIterator>,
    workflow_execution_monitor: Arc<RecurringIterator>,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序");
        config.validate()?;

        let (database, lease_store): (Option<DatabaseManager>, Arc<dyn LeaseStore>) =
            if config.database.is_in_memory() {
                info!("使用进程内租约存储");
                let store: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
                (None, store)
            } else {
                let database = DatabaseManager::new(&config.database)
                    .await
                    .with_context(|| format!("连接数据库失败: {}", config.database.url))?;
                database.migrate().await.context("初始化数据库表结构失败")?;
                let store: Arc<dyn LeaseStore> =
                    Arc::new(SqliteLeaseStore::new(database.pool().clone()));
                (Some(database), store)
            };

        let (transport, task_stream) = InMemoryTaskTransport::new();
        let transport = Arc::new(transport);
        let cache = Arc::new(DelegateCache::from_config(&config.dispatcher));
        let retry = Arc::new(RetryCoordinator::from_config(&config.retry));
        let task_service = Arc::new(DelegateTaskService::new(
            Arc::new(InMemoryDelegateTaskRepository::new()),
            cache,
            transport.clone(),
            retry,
            config.dispatcher.clone(),
        ));
        let perpetual_tasks = Arc::new(PerpetualTaskService::new(
            Arc::new(InMemoryPerpetualTaskRepository::new()),
            config.perpetual_task.clone(),
        ));

        let artifact_streams = Arc::new(InMemoryArtifactStreamRepository::new());
        let workflow_executions = Arc::new(InMemoryWorkflowExecutionRepository::new());
        let resource_constraints = Arc::new(InMemoryResourceConstraintService::new());

        let backoff = BackoffPolicy::from_config(&config.retry);
        let iterator = |handler: Arc<dyn IterationHandler>, iterator_config: &IteratorConfig| {
            Arc::new(RecurringIterator::new(
                lease_store.clone(),
                handler,
                iterator_config.clone(),
                backoff.clone(),
            ))
        };

        let artifact_collection = iterator(
            Arc::new(ArtifactCollectionHandler::new(
                artifact_streams.clone(),
                task_service.clone(),
            )),
            &config.iterators.artifact_collection,
        );
        let resource_constraint_backup = iterator(
            Arc::new(ResourceConstraintBackupHandler::new(resource_constraints.clone())),
            &config.iterators.resource_constraint_backup,
        );
        let workflow_execution_monitor = iterator(
            Arc::new(WorkflowExecutionMonitorHandler::new(
                workflow_executions.clone(),
                workflow_executions.clone(),
                &config.workflow_monitor,
            )),
            &config.iterators.workflow_execution_monitor,
        );

        Ok(Self {
            config,
            database,
            lease_store,
            transport,
            task_stream: Mutex::new(Some(task_stream)),
            task_service,
            perpetual_tasks,
            artifact_streams,
            workflow_executions,
            resource_constraints,
            artifact_collection,
            resource_constraint_backup,
            workflow_execution_monitor,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn lease_store(&self) -> Arc<dyn LeaseStore> {
        self.lease_store.clone()
    }

    pub fn transport(&self) -> Arc<InMemoryTaskTransport> {
        self.transport.clone()
    }

    /// 取走下发给Delegate的任务包流，只能取一次
    pub async fn take_task_stream(&self) -> Option<mpsc::UnboundedReceiver<TaskPackage>> {
        self.task_stream.lock().await.take()
    }

    pub fn task_service(&self) -> Arc<DelegateTaskService> {
        self.task_service.clone()
    }

    pub fn perpetual_tasks(&self) -> Arc<PerpetualTaskService> {
        self.perpetual_tasks.clone()
    }

    pub fn artifact_streams(&self) -> Arc<InMemoryArtifactStreamRepository> {
        self.artifact_streams.clone()
    }

    pub fn workflow_executions(&self) -> Arc<InMemoryWorkflowExecutionRepository> {
        self.workflow_executions.clone()
    }

    pub fn resource_constraints(&self) -> Arc<InMemoryResourceConstraintService> {
        self.resource_constraints.clone()
    }

    pub fn artifact_collection_iterator(&self) -> Arc<RecurringIterator> {
        self.artifact_collection.clone()
    }

    pub fn resource_constraint_backup_iterator(&self) -> Arc<RecurringIterator> {
        self.resource_constraint_backup.clone()
    }

    pub fn workflow_execution_monitor_iterator(&self) -> Arc<RecurringIterator> {
        self.workflow_execution_monitor.clone()
    }

    /// 运行应用程序直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动Delegate调度服务");
        counter!("application_starts_total").increment(1);

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        let iterators = [
            (&self.artifact_collection, &self.config.iterators.artifact_collection),
            (
                &self.resource_constraint_backup,
                &self.config.iterators.resource_constraint_backup,
            ),
            (
                &self.workflow_execution_monitor,
                &self.config.iterators.workflow_execution_monitor,
            ),
        ];
        for (iterator, iterator_config) in iterators {
            if iterator_config.enabled {
                handles.push(iterator.clone().start(shutdown_rx.resubscribe()));
            } else {
                info!("迭代器 {} 已禁用", iterator.group());
            }
        }

        handles.push(
            self.task_service
                .clone()
                .start_expiry_sweep(shutdown_rx.resubscribe()),
        );

        // 没有外部消费者时丢弃下发的任务包，避免通道无限增长
        if let Some(stream) = self.take_task_stream().await {
            handles.push(drain_task_stream(stream, shutdown_rx.resubscribe()));
        }

        let _ = shutdown_rx.recv().await;
        info!("Delegate调度服务收到关闭信号");

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("后台任务异常退出: {e}");
            }
        }

        if let Some(database) = &self.database {
            database.close().await;
            info!("数据库连接已关闭");
        }

        info!("Delegate调度服务已停止");
        Ok(())
    }
}

fn drain_task_stream(
    mut stream: mpsc::UnboundedReceiver<TaskPackage>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                package = stream.recv() => match package {
                    Some(package) => debug!(
                        "没有Delegate连接，丢弃任务包 {} (第 {} 次)",
                        package.task_id, package.attempt
                    ),
                    None => break,
                },
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownManager;
    use std::time::Duration;

    #[tokio::test]
    async fn test_in_memory_application_starts_and_stops() {
        let app = Arc::new(Application::new(AppConfig::default()).await.unwrap());
        assert_eq!(app.artifact_collection_iterator().group(), "artifact_collection");
        assert_eq!(
            app.workflow_execution_monitor_iterator().group(),
            "workflow_execution_monitor"
        );

        let shutdown = ShutdownManager::new();
        let shutdown_rx = shutdown.subscribe();
        let runner = app.clone();
        shutdown
            .track(
                "application",
                tokio::spawn(async move {
                    runner.run(shutdown_rx).await.unwrap();
                }),
            )
            .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let report = shutdown.shutdown(Duration::from_secs(5)).await;
        assert!(report.is_clean());
        assert_eq!(report.completed, vec!["application".to_string()]);
    }

    #[tokio::test]
    async fn test_task_stream_can_only_be_taken_once() {
        let app = Application::new(AppConfig::default()).await.unwrap();
        assert!(app.take_task_stream().await.is_some());
        assert!(app.take_task_stream().await.is_none());
    }
}
