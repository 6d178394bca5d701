//! # Delegate Scheduler
//!
//! 进程入口的组装层：[`app::Application`] 负责创建存储、任务分发服务和周期迭代器，
//! [`shutdown::ShutdownManager`] 负责把关闭信号广播给所有后台循环。

pub mod app;
pub mod shutdown;

pub use app::Application;
pub use shutdown::{ShutdownManager, ShutdownReport};
