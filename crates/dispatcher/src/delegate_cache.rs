use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use delegate_core::config::DispatcherConfig;
use delegate_core::models::{CapabilityCheckResult, DelegateInfo};
use tracing::debug;

/// 已注册Delegate与能力检查结果的内存快照
///
/// 读取是同步的，分配判定可以在不等待的情况下完成。
#[derive(Debug)]
pub struct DelegateCache {
    delegates: RwLock<BTreeMap<String, DelegateInfo>>,
    capability_results: RwLock<HashMap<(String, String), CapabilityCheckResult>>,
    result_ttl: Duration,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DelegateCache {
    pub fn new(result_ttl: Duration) -> Self {
        Self {
            delegates: RwLock::new(BTreeMap::new()),
            capability_results: RwLock::new(HashMap::new()),
            result_ttl,
        }
    }

    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self::new(Duration::seconds(config.capability_result_ttl_seconds as i64))
    }

    pub fn register(&self, delegate: DelegateInfo) {
        debug!("注册Delegate: {} ({})", delegate.id, delegate.hostname);
        write(&self.delegates).insert(delegate.id.clone(), delegate);
    }

    pub fn remove(&self, delegate_id: &str) -> Option<DelegateInfo> {
        write(&self.capability_results).retain(|(id, _), _| id != delegate_id);
        write(&self.delegates).remove(delegate_id)
    }

    pub fn get(&self, delegate_id: &str) -> Option<DelegateInfo> {
        read(&self.delegates).get(delegate_id).cloned()
    }

    pub fn heartbeat(&self, delegate_id: &str, timestamp: DateTime<Utc>) -> bool {
        match write(&self.delegates).get_mut(delegate_id) {
            Some(delegate) => {
                delegate.update_heartbeat(timestamp);
                true
            }
            None => false,
        }
    }

    /// 账号下的Delegate，按 id 排序
    pub fn delegates_for_account(&self, account_id: &str) -> Vec<DelegateInfo> {
        read(&self.delegates)
            .values()
            .filter(|delegate| delegate.account_id == account_id)
            .cloned()
            .collect()
    }

    pub fn record_result(&self, result: CapabilityCheckResult) {
        write(&self.capability_results).insert(
            (result.delegate_id.clone(), result.capability_key.clone()),
            result,
        );
    }

    /// 未过期的检查结果，没有结果时返回 `None`
    pub fn capability_result(&self, delegate_id: &str, capability_key: &str, now: DateTime<Utc>) -> Option<bool> {
        read(&self.capability_results)
            .get(&(delegate_id.to_string(), capability_key.to_string()))
            .filter(|result| now - result.checked_at < self.result_ttl)
            .map(|result| result.validated)
    }
}

impl Default for DelegateCache {
    fn default() -> Self {
        Self::new(Duration::hours(6))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delegate_core::models::Capability;

    #[test]
    fn test_capability_results_expire() {
        let cache = DelegateCache::new(Duration::minutes(10));
        let capability = Capability::http("https://git.example.com");
        let mut result = CapabilityCheckResult::new("d1", &capability, true).unwrap();
        let key = result.capability_key.clone();
        result.checked_at = Utc::now() - Duration::minutes(20);
        cache.record_result(result);

        assert_eq!(cache.capability_result("d1", &key, Utc::now()), None);
        assert_eq!(
            cache.capability_result("d1", &key, Utc::now() - Duration::minutes(15)),
            Some(true)
        );
    }

    #[test]
    fn test_delegates_for_account_sorted() {
        let cache = DelegateCache::default();
        cache.register(DelegateInfo::new("d2", "acc", "h2"));
        cache.register(DelegateInfo::new("d1", "acc", "h1"));
        cache.register(DelegateInfo::new("d3", "other", "h3"));

        let ids: Vec<String> = cache
            .delegates_for_account("acc")
            .into_iter()
            .map(|delegate| delegate.id)
            .collect();
        assert_eq!(ids, vec!["d1", "d2"]);
    }
}
