use std::collections::HashMap;

use async_trait::async_trait;
use delegate_core::models::ArtifactStream;
use delegate_core::traits::ArtifactStreamRepository;
use delegate_core::SchedulerResult;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryArtifactStreamRepository {
    streams: RwLock<HashMap<String, ArtifactStream>>,
}

impl InMemoryArtifactStreamRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, stream: ArtifactStream) {
        self.streams.write().await.insert(stream.id.clone(), stream);
    }
}

#[async_trait]
impl ArtifactStreamRepository for InMemoryArtifactStreamRepository {
    async fn get(&self, stream_id: &str) -> SchedulerResult<Option<ArtifactStream>> {
        Ok(self.streams.read().await.get(stream_id).cloned())
    }
}
