use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::errors::SchedulerError;
use crate::models::{Capability, TaskType};
use crate::SchedulerResult;

pub const DEFAULT_PERPETUAL_INTERVAL_SECONDS: i64 = 60;
pub const DEFAULT_PERPETUAL_TIMEOUT_SECONDS: i64 = 3 * 60 * 60;

/// 周期任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerpetualTaskType {
    ArtifactCollection,
    ManifestCollection,
    InstanceSync,
    K8sWatch,
    ConnectorHeartbeat,
}

static PERPETUAL_TASK_TYPE_LOOKUP: Lazy<HashMap<&'static str, PerpetualTaskType>> =
    Lazy::new(|| {
        PerpetualTaskType::ALL
            .iter()
            .map(|task_type| (task_type.as_str(), *task_type))
            .collect()
    });

impl PerpetualTaskType {
    pub const ALL: [PerpetualTaskType; 5] = [
        PerpetualTaskType::ArtifactCollection,
        PerpetualTaskType::ManifestCollection,
        PerpetualTaskType::InstanceSync,
        PerpetualTaskType::K8sWatch,
        PerpetualTaskType::ConnectorHeartbeat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PerpetualTaskType::ArtifactCollection => "ARTIFACT_COLLECTION",
            PerpetualTaskType::ManifestCollection => "MANIFEST_COLLECTION",
            PerpetualTaskType::InstanceSync => "INSTANCE_SYNC",
            PerpetualTaskType::K8sWatch => "K8S_WATCH",
            PerpetualTaskType::ConnectorHeartbeat => "CONNECTOR_HEARTBEAT",
        }
    }

    /// 远端执行时对应的委派任务类型
    pub fn delegate_task_type(&self) -> TaskType {
        match self {
            PerpetualTaskType::ArtifactCollection | PerpetualTaskType::ManifestCollection => {
                TaskType::ArtifactCollection
            }
            PerpetualTaskType::InstanceSync | PerpetualTaskType::K8sWatch => {
                TaskType::KubernetesFetch
            }
            PerpetualTaskType::ConnectorHeartbeat => TaskType::Http,
        }
    }
}

impl std::str::FromStr for PerpetualTaskType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PERPETUAL_TASK_TYPE_LOOKUP
            .get(s)
            .copied()
            .ok_or_else(|| SchedulerError::InvalidArgument(format!("未知的周期任务类型: {s}")))
    }
}

/// 周期任务的客户端上下文，用于关联创建方与去重
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerpetualTaskClientContext {
    /// 客户端关联键，例如 artifact stream id
    pub client_id: Option<String>,
    pub client_params: BTreeMap<String, String>,
    /// 预先构建好的执行包
    pub execution_bundle: Option<Vec<u8>>,
    pub last_context_updated: Option<DateTime<Utc>>,
}

impl PerpetualTaskClientContext {
    pub fn with_client_id(client_id: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            ..Default::default()
        }
    }

    pub fn with_params(client_params: BTreeMap<String, String>) -> Self {
        Self {
            client_params,
            ..Default::default()
        }
    }

    /// 双方都有 client_id 时只比较 client_id，否则比较参数与执行包
    pub fn is_equivalent(&self, other: &Self) -> bool {
        match (&self.client_id, &other.client_id) {
            (Some(left), Some(right)) => left == right,
            (None, None) => {
                self.client_params == other.client_params
                    && self.execution_bundle == other.execution_bundle
            }
            _ => false,
        }
    }
}

/// 周期任务的执行计划
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerpetualTaskSchedule {
    pub interval_seconds: i64,
    pub timeout_seconds: i64,
}

impl Default for PerpetualTaskSchedule {
    fn default() -> Self {
        Self {
            interval_seconds: DEFAULT_PERPETUAL_INTERVAL_SECONDS,
            timeout_seconds: DEFAULT_PERPETUAL_TIMEOUT_SECONDS,
        }
    }
}

impl PerpetualTaskSchedule {
    pub fn new(interval_seconds: i64, timeout_seconds: i64) -> Self {
        Self {
            interval_seconds,
            timeout_seconds,
        }
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.interval_seconds <= 0 {
            return Err(SchedulerError::InvalidArgument(format!(
                "周期任务间隔必须为正数: {}",
                self.interval_seconds
            )));
        }
        if self.timeout_seconds <= 0 {
            return Err(SchedulerError::InvalidArgument(format!(
                "周期任务超时必须为正数: {}",
                self.timeout_seconds
            )));
        }
        Ok(())
    }
}

/// 周期任务的分配状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerpetualTaskState {
    Unassigned,
    Assigned,
    Paused,
}

/// 周期任务记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerpetualTaskRecord {
    pub id: String,
    pub task_type: PerpetualTaskType,
    pub account_id: String,
    pub client_context: PerpetualTaskClientContext,
    pub schedule: PerpetualTaskSchedule,
    pub state: PerpetualTaskState,
    pub delegate_id: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PerpetualTaskRecord {
    pub fn is_enabled(&self) -> bool {
        self.state != PerpetualTaskState::Paused
    }
}

/// 发送给Delegate的周期任务执行包
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerpetualTaskExecutionBundle {
    pub task_type: PerpetualTaskType,
    pub params: Vec<u8>,
    pub capabilities: Vec<Capability>,
}

impl PerpetualTaskExecutionBundle {
    pub fn encode(&self) -> SchedulerResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> SchedulerResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_validation() {
        assert!(PerpetualTaskSchedule::default().validate().is_ok());
        assert!(PerpetualTaskSchedule::new(0, 10).validate().is_err());
        assert!(PerpetualTaskSchedule::new(10, -1).validate().is_err());
    }

    #[test]
    fn test_context_equivalence() {
        let a = PerpetualTaskClientContext::with_client_id("stream-1");
        let mut b = PerpetualTaskClientContext::with_client_id("stream-1");
        b.client_params.insert("extra".into(), "x".into());
        assert!(a.is_equivalent(&b));

        let mut params = BTreeMap::new();
        params.insert("namespace".into(), "default".into());
        let c = PerpetualTaskClientContext::with_params(params.clone());
        let d = PerpetualTaskClientContext::with_params(params);
        assert!(c.is_equivalent(&d));
        assert!(!a.is_equivalent(&c));
    }

    #[test]
    fn test_perpetual_task_type_lookup() {
        assert_eq!(
            "K8S_WATCH".parse::<PerpetualTaskType>().unwrap(),
            PerpetualTaskType::K8sWatch
        );
        assert!("k8s_watch".parse::<PerpetualTaskType>().is_err());
    }
}
