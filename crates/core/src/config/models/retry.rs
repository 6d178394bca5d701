use serde::{Deserialize, Serialize};

/// 重试与退避配置
///
/// 第 `f` 次失败后的租约时长为 `min(base × multiplier^f, max)`。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_lease_seconds: u64,
    pub max_lease_seconds: u64,
    pub backoff_multiplier: f64,
    /// 达到该失败次数后不再重试
    pub max_failed_attempts: u32,
    /// 委派任务的最大执行次数（含首次）
    pub max_task_attempts: u32,
    /// 已处理响应的去重窗口大小
    pub processed_history_capacity: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_lease_seconds: 60,
            max_lease_seconds: 3600,
            backoff_multiplier: 2.0,
            max_failed_attempts: 5,
            max_task_attempts: 3,
            processed_history_capacity: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_lease_seconds == 0 {
            return Err(anyhow::anyhow!("基础租约时长必须大于0"));
        }
        if self.max_lease_seconds < self.base_lease_seconds {
            return Err(anyhow::anyhow!("最大租约时长不能小于基础租约时长"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数必须是不小于1的有限数"));
        }
        if self.max_failed_attempts == 0 || self.max_task_attempts == 0 {
            return Err(anyhow::anyhow!("最大失败次数必须大于0"));
        }
        if self.processed_history_capacity == 0 {
            return Err(anyhow::anyhow!("去重窗口大小必须大于0"));
        }
        Ok(())
    }
}
