//! 进程内存储实现，用于单机部署与测试

pub mod artifact_stream_repository;
pub mod delegate_task_repository;
pub mod lease_store;
pub mod perpetual_task_repository;
pub mod resource_constraint_service;
pub mod workflow_repository;

pub use artifact_stream_repository::InMemoryArtifactStreamRepository;
pub use delegate_task_repository::InMemoryDelegateTaskRepository;
pub use lease_store::InMemoryLeaseStore;
pub use perpetual_task_repository::InMemoryPerpetualTaskRepository;
pub use resource_constraint_service::InMemoryResourceConstraintService;
pub use workflow_repository::InMemoryWorkflowExecutionRepository;
