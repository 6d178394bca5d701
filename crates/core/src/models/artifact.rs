use serde::{Deserialize, Serialize};

use crate::models::ConnectorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionStatus {
    Active,
    Stopped,
}

/// 需要周期采集的制品源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStream {
    pub id: String,
    pub account_id: String,
    pub connector: ConnectorConfig,
    /// 制品路径或镜像名
    pub source_path: String,
    /// 已由周期任务接管采集
    pub perpetual_task_id: Option<String>,
    pub collection_status: CollectionStatus,
}
