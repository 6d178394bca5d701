use serde::{Deserialize, Serialize};

/// 委派任务分发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 同步调用的默认超时
    pub sync_call_timeout_ms: u64,
    /// 异步委派任务的默认超时
    pub delegated_call_timeout_ms: u64,
    /// Delegate上报的能力检查结果的有效期
    pub capability_result_ttl_seconds: u64,
    /// 过期任务清理周期
    pub expiry_sweep_interval_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            sync_call_timeout_ms: 20_000,
            delegated_call_timeout_ms: 10 * 60 * 1000,
            capability_result_ttl_seconds: 6 * 60 * 60,
            expiry_sweep_interval_seconds: 30,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sync_call_timeout_ms == 0 || self.delegated_call_timeout_ms == 0 {
            return Err(anyhow::anyhow!("同步调用超时必须大于0"));
        }
        if self.capability_result_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("能力检查结果有效期必须大于0"));
        }
        if self.expiry_sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!("过期清理周期必须大于0"));
        }
        Ok(())
    }
}
