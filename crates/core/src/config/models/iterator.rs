use serde::{Deserialize, Serialize};

/// 单个周期迭代器的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IteratorConfig {
    pub enabled: bool,
    pub target_interval_seconds: u64,
    pub thread_pool_size: usize,
    /// 每轮最多取出的到期记录数
    pub batch_size: usize,
}

impl Default for IteratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_interval_seconds: 10,
            thread_pool_size: 5,
            batch_size: 100,
        }
    }
}

impl IteratorConfig {
    pub fn with_interval(target_interval_seconds: u64, thread_pool_size: usize) -> Self {
        Self {
            target_interval_seconds,
            thread_pool_size,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.target_interval_seconds == 0 {
            return Err(anyhow::anyhow!("迭代周期必须大于0"));
        }
        if self.thread_pool_size == 0 {
            return Err(anyhow::anyhow!("线程池大小必须大于0"));
        }
        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("批大小必须大于0"));
        }
        Ok(())
    }
}

/// 所有周期迭代器
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IteratorsConfig {
    pub artifact_collection: IteratorConfig,
    pub resource_constraint_backup: IteratorConfig,
    pub workflow_execution_monitor: IteratorConfig,
}

impl Default for IteratorsConfig {
    fn default() -> Self {
        Self {
            artifact_collection: IteratorConfig::with_interval(60, 25),
            resource_constraint_backup: IteratorConfig::with_interval(30, 5),
            workflow_execution_monitor: IteratorConfig::with_interval(10, 5),
        }
    }
}

impl IteratorsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.artifact_collection
            .validate()
            .map_err(|e| anyhow::anyhow!("artifact_collection: {e}"))?;
        self.resource_constraint_backup
            .validate()
            .map_err(|e| anyhow::anyhow!("resource_constraint_backup: {e}"))?;
        self.workflow_execution_monitor
            .validate()
            .map_err(|e| anyhow::anyhow!("workflow_execution_monitor: {e}"))?;
        Ok(())
    }
}

/// 工作流执行监控阈值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowMonitorConfig {
    /// 无活动子状态且超过该时长未更新即视为失活
    pub inactivity_threshold_seconds: u64,
    /// 超过该存活时长的失活执行标记为 EXPIRED，否则标记为 ERROR
    pub max_execution_age_seconds: u64,
}

impl Default for WorkflowMonitorConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold_seconds: 30,
            max_execution_age_seconds: 3 * 24 * 60 * 60,
        }
    }
}

impl WorkflowMonitorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.inactivity_threshold_seconds == 0 {
            return Err(anyhow::anyhow!("失活阈值必须大于0"));
        }
        if self.max_execution_age_seconds < self.inactivity_threshold_seconds {
            return Err(anyhow::anyhow!("最大执行时长不能小于失活阈值"));
        }
        Ok(())
    }
}
