//! 周期迭代器的处理单元

pub mod artifact_collection;
pub mod resource_constraint_backup;
pub mod workflow_execution_monitor;

pub use artifact_collection::{ArtifactCollectionHandler, ARTIFACT_COLLECTION_GROUP};
pub use resource_constraint_backup::{ResourceConstraintBackupHandler, RESOURCE_CONSTRAINT_BACKUP_GROUP};
pub use workflow_execution_monitor::{WorkflowExecutionMonitorHandler, WORKFLOW_EXECUTION_MONITOR_GROUP};
