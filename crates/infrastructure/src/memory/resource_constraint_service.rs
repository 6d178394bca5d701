use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use delegate_core::traits::ResourceConstraintService;
use delegate_core::{SchedulerError, SchedulerResult};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
struct ConstraintState {
    account_id: String,
    capacity: usize,
    /// 占用者 -> 许可到期时间
    active: HashMap<String, DateTime<Utc>>,
    blocked: VecDeque<(String, Duration)>,
}

/// 内存资源约束（并发许可）
#[derive(Debug, Default)]
pub struct InMemoryResourceConstraintService {
    constraints: Mutex<HashMap<String, ConstraintState>>,
}

impl InMemoryResourceConstraintService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_constraint(&self, account_id: &str, constraint_id: &str, capacity: usize) {
        self.constraints.lock().await.insert(
            constraint_id.to_string(),
            ConstraintState {
                account_id: account_id.to_string(),
                capacity,
                active: HashMap::new(),
                blocked: VecDeque::new(),
            },
        );
    }

    /// 申请许可，容量已满时进入阻塞队列并返回 `false`
    pub async fn acquire(
        &self,
        constraint_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> SchedulerResult<bool> {
        let mut constraints = self.constraints.lock().await;
        let state = constraints
            .get_mut(constraint_id)
            .ok_or_else(|| SchedulerError::InvalidArgument(format!("资源约束不存在: {constraint_id}")))?;

        if state.active.len() < state.capacity {
            state.active.insert(holder.to_string(), Utc::now() + ttl);
            return Ok(true);
        }
        state.blocked.push_back((holder.to_string(), ttl));
        Ok(false)
    }

    pub async fn active_holders(&self, constraint_id: &str) -> Vec<String> {
        let constraints = self.constraints.lock().await;
        let mut holders: Vec<String> = constraints
            .get(constraint_id)
            .map(|state| state.active.keys().cloned().collect())
            .unwrap_or_default();
        holders.sort();
        holders
    }

    fn owned<'a>(
        constraints: &'a mut HashMap<String, ConstraintState>,
        account_id: &str,
        constraint_id: &str,
    ) -> SchedulerResult<&'a mut ConstraintState> {
        constraints
            .get_mut(constraint_id)
            .filter(|state| state.account_id == account_id)
            .ok_or_else(|| SchedulerError::InvalidArgument(format!("资源约束不存在: {constraint_id}")))
    }
}

#[async_trait]
impl ResourceConstraintService for InMemoryResourceConstraintService {
    async fn update_active_constraints(&self, account_id: &str, constraint_id: &str) -> SchedulerResult<usize> {
        let mut constraints = self.constraints.lock().await;
        let state = Self::owned(&mut constraints, account_id, constraint_id)?;
        let now = Utc::now();
        let before = state.active.len();
        state.active.retain(|_, expires_at| *expires_at > now);
        let released = before - state.active.len();
        debug!("资源约束 {} 释放过期许可 {} 个", constraint_id, released);
        Ok(released)
    }

    async fn update_blocked_constraints(&self, account_id: &str, constraint_id: &str) -> SchedulerResult<usize> {
        let mut constraints = self.constraints.lock().await;
        let state = Self::owned(&mut constraints, account_id, constraint_id)?;
        let now = Utc::now();
        let mut unblocked = 0;
        while state.active.len() < state.capacity {
            let Some((holder, ttl)) = state.blocked.pop_front() else {
                break;
            };
            state.active.insert(holder, now + ttl);
            unblocked += 1;
        }
        Ok(unblocked)
    }
}
