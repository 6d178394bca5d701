pub mod app_config;
pub mod database;
pub mod dispatcher;
pub mod iterator;
pub mod observability;
pub mod perpetual_task;
pub mod retry;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher::DispatcherConfig;
pub use iterator::{IteratorConfig, IteratorsConfig, WorkflowMonitorConfig};
pub use observability::ObservabilityConfig;
pub use perpetual_task::PerpetualTaskConfig;
pub use retry::RetryConfig;
