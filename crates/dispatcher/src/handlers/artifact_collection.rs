use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use delegate_core::models::{ArtifactStream, CollectionStatus, DelegateTask, IteratorRecord, TaskType};
use delegate_core::traits::{ArtifactStreamRepository, CapabilityDemander};
use delegate_core::SchedulerResult;

use crate::iterator::{IterationHandler, IterationOutcome};
use crate::task_service::DelegateTaskService;

pub const ARTIFACT_COLLECTION_GROUP: &str = "artifact_collection";

/// 制品采集
///
/// 记录的 key 是制品源 id。每次处理把一个采集任务同步交给Delegate执行，
/// 已由周期任务接管的制品源只跳过本轮。
pub struct ArtifactCollectionHandler {
    streams: Arc<dyn ArtifactStreamRepository>,
    tasks: Arc<DelegateTaskService>,
}

impl ArtifactCollectionHandler {
    pub fn new(streams: Arc<dyn ArtifactStreamRepository>, tasks: Arc<DelegateTaskService>) -> Self {
        Self { streams, tasks }
    }

    fn collection_task(stream: &ArtifactStream) -> SchedulerResult<DelegateTask> {
        let parameters = serde_json::to_vec(&json!({
            "artifact_stream_id": stream.id,
            "source_path": stream.source_path,
            "connector": stream.connector,
        }))?;
        let mut task = DelegateTask::new(stream.account_id.clone(), TaskType::ArtifactCollection, parameters);
        task.capabilities = stream.connector.fetch_required_capabilities();
        task.description = Some(format!("采集制品源 {}", stream.id));
        Ok(task)
    }
}

#[async_trait]
impl IterationHandler for ArtifactCollectionHandler {
    fn group(&self) -> &str {
        ARTIFACT_COLLECTION_GROUP
    }

    async fn handle(&self, record: &IteratorRecord) -> SchedulerResult<IterationOutcome> {
        let Some(stream) = self.streams.get(&record.key).await? else {
            debug!("制品源 {} 不存在，停止采集", record.key);
            return Ok(IterationOutcome::Finished);
        };
        if stream.collection_status == CollectionStatus::Stopped {
            return Ok(IterationOutcome::Finished);
        }
        if let Some(perpetual_task_id) = &stream.perpetual_task_id {
            debug!("制品源 {} 由周期任务 {} 采集，跳过", stream.id, perpetual_task_id);
            return Ok(IterationOutcome::Reschedule);
        }

        let task = Self::collection_task(&stream)?;
        self.tasks
            .execute_task(task, "Artifact collection failed")
            .await?;
        info!("制品源 {} 采集完成", stream.id);
        Ok(IterationOutcome::Reschedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate_cache::DelegateCache;
    use crate::retry_service::RetryCoordinator;
    use delegate_core::config::{DispatcherConfig, RetryConfig};
    use delegate_core::models::{
        Capability, ConnectorConfig, TaskExecutionResponse, TaskResponseData,
    };
    use delegate_infrastructure::{InMemoryArtifactStreamRepository, InMemoryDelegateTaskRepository};
    use delegate_testing_utils::{DelegateInfoBuilder, IteratorRecordBuilder, MockTaskTransport};

    fn stream(id: &str) -> ArtifactStream {
        ArtifactStream {
            id: id.to_string(),
            account_id: "test-account".to_string(),
            connector: ConnectorConfig::Http {
                url: "https://nexus.example.com".to_string(),
                delegate_selectors: vec!["nexus".to_string()],
            },
            source_path: "releases/app".to_string(),
            perpetual_task_id: None,
            collection_status: CollectionStatus::Active,
        }
    }

    fn handler(transport: MockTaskTransport) -> (ArtifactCollectionHandler, Arc<InMemoryArtifactStreamRepository>) {
        let cache = Arc::new(DelegateCache::default());
        cache.register(DelegateInfoBuilder::new("d1").with_tags(&["nexus"]).build());
        let service = DelegateTaskService::new(
            Arc::new(InMemoryDelegateTaskRepository::new()),
            cache,
            Arc::new(transport),
            Arc::new(RetryCoordinator::from_config(&RetryConfig::default())),
            DispatcherConfig::default(),
        );
        let streams = Arc::new(InMemoryArtifactStreamRepository::new());
        (ArtifactCollectionHandler::new(streams.clone(), Arc::new(service)), streams)
    }

    fn record(id: &str) -> IteratorRecord {
        IteratorRecordBuilder::new(ARTIFACT_COLLECTION_GROUP, id).build()
    }

    #[tokio::test]
    async fn test_dispatches_collection_task_with_connector_capabilities() {
        let transport = MockTaskTransport::replying(&TaskResponseData::Execution(
            TaskExecutionResponse::success(Vec::new()),
        ));
        let (handler, streams) = handler(transport.clone());
        streams.insert(stream("s1")).await;

        let outcome = handler.handle(&record("s1")).await.unwrap();
        assert_eq!(outcome, IterationOutcome::Reschedule);

        let sent = transport.sent_packages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].task_type, TaskType::ArtifactCollection);
        let parameters: serde_json::Value = serde_json::from_slice(&sent[0].parameters).unwrap();
        assert_eq!(parameters["artifact_stream_id"], "s1");

        let capabilities = ArtifactCollectionHandler::collection_task(&stream("s1")).unwrap().capabilities;
        assert!(capabilities.contains(&Capability::http("https://nexus.example.com")));
        assert_eq!(capabilities.len(), 2);
    }

    #[tokio::test]
    async fn test_collection_error_is_returned() {
        let transport = MockTaskTransport::replying(&TaskResponseData::error_notify("unreachable"));
        let (handler, streams) = handler(transport);
        streams.insert(stream("s1")).await;

        let err = handler.handle(&record("s1")).await.unwrap_err();
        assert!(err.to_string().contains("Artifact collection failed - unreachable"));
    }

    #[tokio::test]
    async fn test_streams_served_by_perpetual_task_are_skipped() {
        let transport = MockTaskTransport::replying(&TaskResponseData::error_notify("unused"));
        let (handler, streams) = handler(transport.clone());
        let mut served = stream("s1");
        served.perpetual_task_id = Some("pt-1".into());
        streams.insert(served).await;
        let mut stopped = stream("s2");
        stopped.collection_status = CollectionStatus::Stopped;
        streams.insert(stopped).await;

        assert_eq!(handler.handle(&record("s1")).await.unwrap(), IterationOutcome::Reschedule);
        assert_eq!(handler.handle(&record("s2")).await.unwrap(), IterationOutcome::Finished);
        assert_eq!(handler.handle(&record("s3")).await.unwrap(), IterationOutcome::Finished);
        assert_eq!(transport.sent_count(), 0);
    }
}
