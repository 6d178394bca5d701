use serde::{Deserialize, Serialize};

use crate::models::{DEFAULT_PERPETUAL_INTERVAL_SECONDS, DEFAULT_PERPETUAL_TIMEOUT_SECONDS};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerpetualTaskConfig {
    pub default_interval_seconds: i64,
    pub default_timeout_seconds: i64,
}

impl Default for PerpetualTaskConfig {
    fn default() -> Self {
        Self {
            default_interval_seconds: DEFAULT_PERPETUAL_INTERVAL_SECONDS,
            default_timeout_seconds: DEFAULT_PERPETUAL_TIMEOUT_SECONDS,
        }
    }
}

impl PerpetualTaskConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_interval_seconds <= 0 || self.default_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("周期任务默认间隔与超时必须为正数"));
        }
        Ok(())
    }
}
