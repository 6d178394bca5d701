//! # 数据模型
//!
//! 定义Delegate任务分配与周期任务调度的核心数据结构。
//!
//! ## 核心模型
//!
//! ### DelegateTask - 委派任务
//! 交给某一个远端Delegate执行的工作单元，包含能力要求、白名单与重试次数。
//!
//! ### Capability - 能力要求
//! 任务对执行者的要求，分为调度端判定（选择器）和Delegate验证（连通性）两类。
//!
//! ### IteratorRecord / Lease - 周期迭代游标与租约
//! 周期迭代器在租约存储中的待处理实体以及 `(group, key)` 上的独占租约。
//!
//! ### PerpetualTaskRecord - 周期任务
//! 在远端按固定间隔反复执行的长期任务。
//!
//! ## 设计原则
//!
//! - 所有时间字段使用 `DateTime<Utc>`
//! - 状态字段使用枚举类型，未知的外部输入反序列化为 `Unknown` 变体
//! - 任务参数为不透明字节，调度端不解析

pub mod artifact;
pub mod capability;
pub mod connector;
pub mod delegate;
pub mod lease;
pub mod perpetual_task;
pub mod response;
pub mod retry;
pub mod selection_log;
pub mod task;
pub mod workflow;

pub use artifact::{ArtifactStream, CollectionStatus};
pub use capability::{Capability, CapabilityCheckResult, CapabilityEvaluationMode};
pub use connector::ConnectorConfig;
pub use delegate::{DelegateInfo, DelegateStatus};
pub use lease::{IteratorRecord, Lease};
pub use perpetual_task::{
    PerpetualTaskClientContext, PerpetualTaskExecutionBundle, PerpetualTaskRecord,
    PerpetualTaskSchedule, PerpetualTaskState, PerpetualTaskType,
    DEFAULT_PERPETUAL_INTERVAL_SECONDS, DEFAULT_PERPETUAL_TIMEOUT_SECONDS,
};
pub use response::{CommandExecutionStatus, TaskExecutionResponse, TaskResponseData};
pub use retry::{RetryCandidate, RetryDecision};
pub use selection_log::{SelectionLog, SelectionLogEntry, SelectionReason};
pub use task::{DelegateTask, DelegateTaskStatus, TaskPackage, TaskType, DEFAULT_SYNC_CALL_TIMEOUT_MS};
pub use workflow::{ExecutionStatus, WorkflowExecution};
