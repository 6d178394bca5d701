//! # Delegate Dispatcher
//!
//! 委派任务调度核心：
//!
//! - [`assignment`]：根据Delegate快照判定任务能否分配，并记录选择日志
//! - [`sync_executor`]：同步下发任务并等待、归类响应
//! - [`retry_service`]：重试观察者链与指数退避
//! - [`task_service`]：任务排队、领取、响应处理、过期与中止
//! - [`iterator`] 与 [`handlers`]：基于租约的周期迭代调度
//! - [`perpetual_task`]：周期任务注册中心

pub mod assignment;
pub mod delegate_cache;
pub mod handlers;
pub mod iterator;
pub mod perpetual_task;
pub mod retry_service;
pub mod sync_executor;
pub mod task_service;

pub use assignment::TaskAssignmentEvaluator;
pub use delegate_cache::DelegateCache;
pub use iterator::{CycleReport, IterationHandler, IterationOutcome, RecurringIterator};
pub use perpetual_task::{build_execution_bundle, PerpetualTaskService};
pub use retry_service::{
    requeue_task, BackoffDelayObserver, BackoffPolicy, ExcludeFailedDelegateObserver,
    MaxAttemptsObserver, RetryCoordinator, RetryMetricsObserver, RetryObserver,
};
pub use sync_executor::{classify_response, SyncTaskExecutor};
pub use task_service::{DelegateTaskService, ResponseOutcome, TaskAcquisition};
