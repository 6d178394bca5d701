use async_trait::async_trait;

use crate::models::{Capability, ExecutionStatus};
use crate::SchedulerResult;

/// 能声明执行所需Delegate能力的对象
pub trait CapabilityDemander: Send + Sync {
    fn fetch_required_capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }
}

/// 不声明任何能力
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCapabilities;

impl CapabilityDemander for NoCapabilities {}

/// 强制结束工作流执行的回调
#[async_trait]
pub trait ExecutionInterruptCallback: Send + Sync {
    async fn force_terminal(
        &self,
        account_id: &str,
        execution_id: &str,
        status: ExecutionStatus,
        reason: &str,
    ) -> SchedulerResult<()>;
}

/// 资源约束（并发许可）服务
#[async_trait]
pub trait ResourceConstraintService: Send + Sync {
    /// 刷新正在占用的许可，返回变更数量
    async fn update_active_constraints(&self, account_id: &str, constraint_id: &str) -> SchedulerResult<usize>;

    /// 尝试放行被阻塞的申请，返回放行数量
    async fn update_blocked_constraints(&self, account_id: &str, constraint_id: &str) -> SchedulerResult<usize>;
}
