use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, info, warn};

use delegate_core::config::RetryConfig;
use delegate_core::models::{DelegateTask, DelegateTaskStatus, RetryCandidate, RetryDecision};

/// 指数退避策略
///
/// 第 `f` 次失败后的租约时长为 `min(base × multiplier^f, max)`，随 `f` 单调不减。
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    multiplier: f64,
    max_failed_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, multiplier: f64, max_failed_attempts: u32) -> Self {
        Self {
            base,
            max: max.max(base),
            multiplier: if multiplier.is_finite() && multiplier >= 1.0 {
                multiplier
            } else {
                1.0
            },
            max_failed_attempts,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_secs(config.base_lease_seconds),
            Duration::from_secs(config.max_lease_seconds),
            config.backoff_multiplier,
            config.max_failed_attempts,
        )
    }

    pub fn lease_duration(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.min(i32::MAX as u32) as i32;
        let seconds = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        if !seconds.is_finite() || seconds >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(seconds).min(self.max)
    }

    /// 达到最大失败次数后不再调度
    pub fn is_exhausted(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_failed_attempts
    }

    pub fn max_failed_attempts(&self) -> u32 {
        self.max_failed_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// 重试观察者
///
/// 按注册顺序调用，每个观察者看到的是前一个观察者修改后的候选。
#[async_trait]
pub trait RetryObserver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_possible_retry(&self, candidate: RetryCandidate) -> RetryCandidate;

    async fn on_task_response_processed(&self, _task: &DelegateTask, _delegate_id: &str) {}
}

/// 限制最大执行次数
pub struct MaxAttemptsObserver {
    max_task_attempts: u32,
}

impl MaxAttemptsObserver {
    pub fn new(max_task_attempts: u32) -> Self {
        Self { max_task_attempts }
    }
}

#[async_trait]
impl RetryObserver for MaxAttemptsObserver {
    fn name(&self) -> &'static str {
        "max_attempts"
    }

    async fn on_possible_retry(&self, mut candidate: RetryCandidate) -> RetryCandidate {
        if candidate.attempt >= self.max_task_attempts {
            candidate.give_up(format!(
                "已达到最大执行次数 {}: {}",
                self.max_task_attempts, candidate.failure_message
            ));
        }
        candidate
    }
}

/// 重试时排除上一次失败的Delegate
pub struct ExcludeFailedDelegateObserver;

#[async_trait]
impl RetryObserver for ExcludeFailedDelegateObserver {
    fn name(&self) -> &'static str {
        "exclude_failed_delegate"
    }

    async fn on_possible_retry(&self, mut candidate: RetryCandidate) -> RetryCandidate {
        if let Some(delegate_id) = candidate.failed_delegate_id.clone() {
            candidate.excluded_delegate_ids.insert(delegate_id);
        }
        candidate
    }
}

/// 异步任务按退避策略延迟重新下发，同步任务立即重试
pub struct BackoffDelayObserver {
    policy: BackoffPolicy,
}

impl BackoffDelayObserver {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl RetryObserver for BackoffDelayObserver {
    fn name(&self) -> &'static str {
        "backoff_delay"
    }

    async fn on_possible_retry(&self, mut candidate: RetryCandidate) -> RetryCandidate {
        if candidate.is_async && candidate.should_retry() {
            candidate.delay = self
                .policy
                .lease_duration(candidate.attempt.saturating_sub(1));
        }
        candidate
    }
}

pub struct RetryMetricsObserver;

#[async_trait]
impl RetryObserver for RetryMetricsObserver {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn on_possible_retry(&self, candidate: RetryCandidate) -> RetryCandidate {
        let outcome = if candidate.should_retry() { "retry" } else { "give_up" };
        counter!("delegate_task_retry_decisions_total", "outcome" => outcome).increment(1);
        candidate
    }

    async fn on_task_response_processed(&self, _task: &DelegateTask, _delegate_id: &str) {
        counter!("delegate_task_responses_processed_total").increment(1);
    }
}

/// 已处理响应的有界去重窗口
#[derive(Debug)]
struct ProcessedHistory {
    order: VecDeque<(String, u32)>,
    seen: HashSet<(String, u32)>,
    capacity: usize,
}

impl ProcessedHistory {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// 首次出现时返回 `true`
    fn insert(&mut self, key: (String, u32)) -> bool {
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

/// 重试协调器
pub struct RetryCoordinator {
    observers: Vec<Arc<dyn RetryObserver>>,
    processed: Mutex<ProcessedHistory>,
}

impl RetryCoordinator {
    pub fn new(observers: Vec<Arc<dyn RetryObserver>>, processed_history_capacity: usize) -> Self {
        Self {
            observers,
            processed: Mutex::new(ProcessedHistory::new(processed_history_capacity)),
        }
    }

    /// 默认的观察者链：最大次数、排除失败Delegate、退避延迟、指标
    pub fn from_config(config: &RetryConfig) -> Self {
        let observers: Vec<Arc<dyn RetryObserver>> = vec![
            Arc::new(MaxAttemptsObserver::new(config.max_task_attempts)),
            Arc::new(ExcludeFailedDelegateObserver),
            Arc::new(BackoffDelayObserver::new(BackoffPolicy::from_config(config))),
            Arc::new(RetryMetricsObserver),
        ];
        Self::new(observers, config.processed_history_capacity)
    }

    pub fn register(&mut self, observer: Arc<dyn RetryObserver>) {
        self.observers.push(observer);
    }

    pub fn observer_names(&self) -> Vec<&'static str> {
        self.observers.iter().map(|observer| observer.name()).collect()
    }

    pub fn candidate_for(
        task: &DelegateTask,
        failed_delegate_id: Option<&str>,
        failure_message: &str,
    ) -> RetryCandidate {
        RetryCandidate {
            task_id: task.id.clone(),
            account_id: task.account_id.clone(),
            attempt: task.attempt,
            is_async: task.is_async,
            failed_delegate_id: failed_delegate_id.map(str::to_string),
            failure_message: failure_message.to_string(),
            excluded_delegate_ids: task.excluded_delegate_ids.clone(),
            delay: Duration::ZERO,
            give_up_reason: None,
        }
    }

    pub async fn on_possible_retry(&self, candidate: RetryCandidate) -> RetryCandidate {
        let mut candidate = candidate;
        for observer in &self.observers {
            candidate = observer.on_possible_retry(candidate).await;
            debug!(
                task_id = %candidate.task_id,
                observer = observer.name(),
                retry = candidate.should_retry(),
                "重试观察者已处理"
            );
        }
        candidate
    }

    /// 对一次失败给出最终决定
    pub async fn decide(
        &self,
        task: &DelegateTask,
        failed_delegate_id: Option<&str>,
        failure_message: &str,
    ) -> RetryDecision {
        let candidate = Self::candidate_for(task, failed_delegate_id, failure_message);
        let decision = self.on_possible_retry(candidate).await.decision();
        match &decision {
            RetryDecision::Retry { next_attempt, .. } => {
                info!("任务 {} 将进行第 {} 次执行", task.id, next_attempt);
            }
            RetryDecision::GiveUp { reason } => {
                warn!("任务 {} 不再重试: {}", task.id, reason);
            }
        }
        decision
    }

    /// 通知观察者响应已处理，同一任务的同一次执行只通知一次
    pub async fn on_task_response_processed(&self, task: &DelegateTask, delegate_id: &str) -> bool {
        let first = self
            .processed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((task.id.clone(), task.attempt));
        if !first {
            debug!("任务 {} 第 {} 次执行的响应已处理过", task.id, task.attempt);
            return false;
        }

        for observer in &self.observers {
            observer.on_task_response_processed(task, delegate_id).await;
        }
        true
    }
}

/// 根据重试决定生成任务的下一个状态
///
/// 重试时保留任务 id，执行次数加一并回到未分配的排队状态；放弃时标记为失败。
pub fn requeue_task(task: &DelegateTask, decision: &RetryDecision, now: DateTime<Utc>) -> DelegateTask {
    let mut next = task.clone();
    match decision {
        RetryDecision::Retry {
            next_attempt,
            delay,
            excluded_delegate_ids,
        } => {
            let delay = chrono::Duration::from_std(*delay).unwrap_or_else(|_| chrono::Duration::zero());
            next.attempt = *next_attempt;
            next.status = DelegateTaskStatus::Queued;
            next.delegate_id = None;
            next.excluded_delegate_ids = excluded_delegate_ids.clone();
            next.broadcast_delegate_ids.clear();
            next.validating_delegate_ids.clear();
            next.validation_complete_delegate_ids.clear();
            next.error_message = None;
            next.expires_at = now + delay + chrono::Duration::milliseconds(task.timeout_ms as i64);
        }
        RetryDecision::GiveUp { reason } => {
            next.status = DelegateTaskStatus::Failed;
            next.error_message = Some(reason.clone());
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use delegate_core::models::TaskType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_backoff_grows_by_multiplier() {
        let policy = BackoffPolicy::new(Duration::from_secs(60), Duration::from_secs(3600), 2.0, 5);
        let d0 = policy.lease_duration(0);
        let d1 = policy.lease_duration(1);
        assert_eq!(d0, Duration::from_secs(60));
        assert_eq!(d1, Duration::from_secs(120));
        assert!(d1 > d0);
        assert_eq!(policy.lease_duration(10), Duration::from_secs(3600));
    }

    #[test]
    fn test_backoff_is_monotonic() {
        let policy = BackoffPolicy::new(Duration::from_secs(7), Duration::from_secs(5000), 1.7, 5);
        let mut previous = Duration::ZERO;
        for failures in 0..200 {
            let current = policy.lease_duration(failures);
            assert!(current >= previous, "f={failures}");
            previous = current;
        }
        assert_eq!(policy.lease_duration(u32::MAX), Duration::from_secs(5000));
    }

    #[test]
    fn test_exhaustion() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10), 2.0, 3);
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }

    struct CountingObserver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RetryObserver for CountingObserver {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn on_possible_retry(&self, candidate: RetryCandidate) -> RetryCandidate {
            candidate
        }

        async fn on_task_response_processed(&self, _task: &DelegateTask, _delegate_id: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// 只有看到前一个观察者的排除结果才放弃
    struct RequiresExclusionObserver;

    #[async_trait]
    impl RetryObserver for RequiresExclusionObserver {
        fn name(&self) -> &'static str {
            "requires_exclusion"
        }

        async fn on_possible_retry(&self, mut candidate: RetryCandidate) -> RetryCandidate {
            if candidate.excluded_delegate_ids.contains("d1") {
                candidate.give_up("d1 excluded");
            }
            candidate
        }
    }

    #[tokio::test]
    async fn test_observers_run_in_registration_order() {
        let coordinator = RetryCoordinator::new(
            vec![Arc::new(ExcludeFailedDelegateObserver), Arc::new(RequiresExclusionObserver)],
            16,
        );
        let task = DelegateTask::new("acc", TaskType::Http, Vec::new());
        let decision = coordinator.decide(&task, Some("d1"), "boom").await;
        assert_eq!(
            decision,
            RetryDecision::GiveUp {
                reason: "d1 excluded".into()
            }
        );

        let reversed = RetryCoordinator::new(
            vec![Arc::new(RequiresExclusionObserver), Arc::new(ExcludeFailedDelegateObserver)],
            16,
        );
        let decision = reversed.decide(&task, Some("d1"), "boom").await;
        assert!(matches!(decision, RetryDecision::Retry { next_attempt: 2, .. }));
    }

    #[tokio::test]
    async fn test_max_attempts_gives_up() {
        let coordinator = RetryCoordinator::from_config(&RetryConfig {
            max_task_attempts: 2,
            ..Default::default()
        });
        let mut task = DelegateTask::new("acc", TaskType::Http, Vec::new());
        assert!(matches!(
            coordinator.decide(&task, Some("d1"), "boom").await,
            RetryDecision::Retry { .. }
        ));

        task.attempt = 2;
        assert!(matches!(
            coordinator.decide(&task, Some("d1"), "boom").await,
            RetryDecision::GiveUp { .. }
        ));
    }

    #[tokio::test]
    async fn test_async_tasks_get_backoff_delay() {
        let coordinator = RetryCoordinator::from_config(&RetryConfig::default());
        let mut task = DelegateTask::new("acc", TaskType::Http, Vec::new());

        match coordinator.decide(&task, None, "boom").await {
            RetryDecision::Retry { delay, .. } => assert_eq!(delay, Duration::ZERO),
            other => panic!("unexpected decision: {other:?}"),
        }

        task.is_async = true;
        match coordinator.decide(&task, None, "boom").await {
            RetryDecision::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(60)),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_response_processed_is_idempotent() {
        let counter = Arc::new(CountingObserver {
            calls: AtomicUsize::new(0),
        });
        let coordinator = RetryCoordinator::new(vec![counter.clone()], 16);
        let mut task = DelegateTask::new("acc", TaskType::Http, Vec::new());

        assert!(coordinator.on_task_response_processed(&task, "d1").await);
        assert!(!coordinator.on_task_response_processed(&task, "d1").await);
        task.attempt = 2;
        assert!(coordinator.on_task_response_processed(&task, "d2").await);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_processed_history_is_bounded() {
        let mut history = ProcessedHistory::new(2);
        assert!(history.insert(("a".into(), 1)));
        assert!(history.insert(("b".into(), 1)));
        assert!(history.insert(("c".into(), 1)));
        assert!(history.insert(("a".into(), 1)));
        assert!(!history.insert(("c".into(), 1)));
    }

    #[test]
    fn test_requeue_keeps_id_and_increments_attempt() {
        let mut task = DelegateTask::new("acc", TaskType::Http, b"p".to_vec());
        task.timeout_ms = 1_000;
        task.delegate_id = Some("d1".into());
        task.status = DelegateTaskStatus::Started;
        task.validating_delegate_ids.insert("d1".into());

        let decision = RetryDecision::Retry {
            next_attempt: 2,
            delay: Duration::ZERO,
            excluded_delegate_ids: ["d1".to_string()].into_iter().collect(),
        };
        let now = Utc::now();
        let next = requeue_task(&task, &decision, now);

        assert_eq!(next.id, task.id);
        assert_eq!(next.attempt, 2);
        assert_eq!(next.status, DelegateTaskStatus::Queued);
        assert!(next.delegate_id.is_none());
        assert!(next.excluded_delegate_ids.contains("d1"));
        assert!(next.validating_delegate_ids.is_empty());
        assert_eq!(next.parameters, task.parameters);
        assert!(next.expires_at > now);

        let failed = requeue_task(&task, &RetryDecision::GiveUp { reason: "done".into() }, now);
        assert_eq!(failed.status, DelegateTaskStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("done"));
    }
}
