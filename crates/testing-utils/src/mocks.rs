//! Test doubles for the external collaborators
//!
//! Repository and lease store implementations live in the infrastructure
//! crate; this module only covers collaborators that have no production
//! in-process implementation worth testing against.

use async_trait::async_trait;
use delegate_core::models::{ExecutionStatus, TaskPackage, TaskResponseData};
use delegate_core::traits::{
    ExecutionInterruptCallback, PendingResponse, ResourceConstraintService, TaskTransport,
};
use delegate_core::{SchedulerError, SchedulerResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// How the mock transport answers a sent package
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Respond immediately with these bytes
    Bytes(Vec<u8>),
    /// Keep the waiter pending until `deliver_response` is called
    Hold,
    /// Drop the waiter so the caller observes an interruption
    Interrupt,
}

impl MockReply {
    pub fn response(response: &TaskResponseData) -> Self {
        MockReply::Bytes(response.encode().unwrap())
    }
}

/// Mock implementation of TaskTransport for testing
#[derive(Debug, Clone)]
pub struct MockTaskTransport {
    sent: Arc<Mutex<Vec<TaskPackage>>>,
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    default_reply: MockReply,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Vec<u8>>>>>,
}

impl MockTaskTransport {
    pub fn new(default_reply: MockReply) -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            replies: Arc::new(Mutex::new(VecDeque::new())),
            default_reply,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn replying(response: &TaskResponseData) -> Self {
        Self::new(MockReply::response(response))
    }

    /// Queue a reply used for the next send, ahead of the default
    pub fn push_reply(&self, reply: MockReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn sent_packages(&self) -> Vec<TaskPackage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskTransport for MockTaskTransport {
    async fn send(&self, package: TaskPackage) -> SchedulerResult<PendingResponse> {
        let task_id = package.task_id.clone();
        self.sent.lock().unwrap().push(package);

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());

        let (tx, rx) = oneshot::channel();
        match reply {
            MockReply::Bytes(bytes) => {
                let _ = tx.send(bytes);
            }
            MockReply::Hold => {
                self.pending.lock().unwrap().insert(task_id, tx);
            }
            MockReply::Interrupt => drop(tx),
        }
        Ok(rx)
    }

    async fn broadcast(&self, package: TaskPackage) -> SchedulerResult<()> {
        self.sent.lock().unwrap().push(package);
        Ok(())
    }

    async fn deliver_response(&self, task_id: &str, response: Vec<u8>) -> bool {
        match self.pending.lock().unwrap().remove(task_id) {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    async fn cancel(&self, task_id: &str) -> bool {
        self.pending.lock().unwrap().remove(task_id).is_some()
    }
}

/// Mock ResourceConstraintService that records every call
#[derive(Debug, Clone, Default)]
pub struct MockResourceConstraintService {
    calls: Arc<Mutex<Vec<(String, String)>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl MockResourceConstraintService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, constraint_id: &str) {
        self.failing.lock().unwrap().insert(constraint_id.to_string());
    }

    /// `(operation, constraint_id)` in call order
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, operation: &str, constraint_id: &str) -> SchedulerResult<usize> {
        self.calls
            .lock()
            .unwrap()
            .push((operation.to_string(), constraint_id.to_string()));
        if self.failing.lock().unwrap().contains(constraint_id) {
            return Err(SchedulerError::Internal(format!(
                "constraint {constraint_id} unavailable"
            )));
        }
        Ok(1)
    }
}

#[async_trait]
impl ResourceConstraintService for MockResourceConstraintService {
    async fn update_active_constraints(&self, _account_id: &str, constraint_id: &str) -> SchedulerResult<usize> {
        self.record("active", constraint_id)
    }

    async fn update_blocked_constraints(&self, _account_id: &str, constraint_id: &str) -> SchedulerResult<usize> {
        self.record("blocked", constraint_id)
    }
}

/// Records forced terminations instead of applying them
#[derive(Debug, Clone, Default)]
pub struct RecordingInterruptCallback {
    interrupts: Arc<Mutex<Vec<(String, ExecutionStatus, String)>>>,
}

impl RecordingInterruptCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupts(&self) -> Vec<(String, ExecutionStatus, String)> {
        self.interrupts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionInterruptCallback for RecordingInterruptCallback {
    async fn force_terminal(
        &self,
        _account_id: &str,
        execution_id: &str,
        status: ExecutionStatus,
        reason: &str,
    ) -> SchedulerResult<()> {
        self.interrupts
            .lock()
            .unwrap()
            .push((execution_id.to_string(), status, reason.to_string()));
        Ok(())
    }
}
