use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use delegate_core::models::{IteratorRecord, Lease};
use delegate_core::traits::LeaseStore;
use delegate_core::SchedulerResult;
use tokio::sync::Mutex;
use tracing::debug;

type RecordKey = (String, String);

#[derive(Debug, Default)]
struct LeaseState {
    records: HashMap<RecordKey, IteratorRecord>,
    leases: HashMap<RecordKey, Lease>,
    next_sequence: u64,
}

/// 内存租约存储
///
/// 记录与租约放在同一把锁下，所有读改写都在锁内完成。
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    state: Mutex<LeaseState>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_key(group: &str, key: &str) -> RecordKey {
        (group.to_string(), key.to_string())
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn upsert_record(&self, record: IteratorRecord) -> SchedulerResult<IteratorRecord> {
        let mut state = self.state.lock().await;
        let id = Self::record_key(&record.group, &record.key);

        if let Some(existing) = state.records.get_mut(&id) {
            existing.account_id = record.account_id;
            existing.priority = record.priority;
            return Ok(existing.clone());
        }

        state.next_sequence += 1;
        let mut record = record;
        record.sequence = state.next_sequence;
        state.records.insert(id, record.clone());
        debug!("新增迭代记录: {}/{}", record.group, record.key);
        Ok(record)
    }

    async fn get_record(&self, group: &str, key: &str) -> SchedulerResult<Option<IteratorRecord>> {
        let state = self.state.lock().await;
        Ok(state.records.get(&Self::record_key(group, key)).cloned())
    }

    async fn remove_record(&self, group: &str, key: &str) -> SchedulerResult<bool> {
        let mut state = self.state.lock().await;
        let id = Self::record_key(group, key);
        state.leases.remove(&id);
        Ok(state.records.remove(&id).is_some())
    }

    async fn due_records(
        &self,
        group: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<IteratorRecord>> {
        let state = self.state.lock().await;
        let mut due: Vec<IteratorRecord> = state
            .records
            .values()
            .filter(|record| record.group == group && record.is_due(now))
            .filter(|record| {
                state
                    .leases
                    .get(&Self::record_key(&record.group, &record.key))
                    .map_or(true, |lease| !lease.is_active(now))
            })
            .cloned()
            .collect();

        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.sequence.cmp(&b.sequence))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn update_schedule(
        &self,
        group: &str,
        key: &str,
        next_eligible_at: DateTime<Utc>,
        failed_attempts: u32,
        disabled: bool,
    ) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        if let Some(record) = state.records.get_mut(&Self::record_key(group, key)) {
            record.next_eligible_at = next_eligible_at;
            record.failed_attempts = failed_attempts;
            record.disabled = disabled;
        }
        Ok(())
    }

    async fn reset_record(&self, group: &str, key: &str, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let mut state = self.state.lock().await;
        match state.records.get_mut(&Self::record_key(group, key)) {
            Some(record) => {
                record.failed_attempts = 0;
                record.disabled = false;
                record.next_eligible_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn try_acquire(
        &self,
        group: &str,
        key: &str,
        owner: &str,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<Lease>> {
        let mut state = self.state.lock().await;
        let id = Self::record_key(group, key);

        if let Some(current) = state.leases.get(&id) {
            if current.is_active(now) {
                return Ok(None);
            }
        }

        let mut lease = Lease::new(group, key, owner, now, lease_duration);
        lease.failed_attempts = state
            .records
            .get(&id)
            .map(|record| record.failed_attempts)
            .unwrap_or(0);
        state.leases.insert(id, lease.clone());
        Ok(Some(lease))
    }

    async fn release(&self, lease: &Lease) -> SchedulerResult<bool> {
        let mut state = self.state.lock().await;
        let id = Self::record_key(&lease.group, &lease.key);
        match state.leases.get(&id) {
            Some(current) if current.token == lease.token => {
                state.leases.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_lease(&self, group: &str, key: &str) -> SchedulerResult<Option<Lease>> {
        let state = self.state.lock().await;
        Ok(state.leases.get(&Self::record_key(group, key)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_acquire_fails_while_held() {
        let store = InMemoryLeaseStore::new();
        let now = Utc::now();
        let lease = store
            .try_acquire("g", "k", "a", Duration::seconds(30), now)
            .await
            .unwrap();
        assert!(lease.is_some());

        let second = store
            .try_acquire("g", "k", "b", Duration::seconds(30), now + Duration::seconds(10))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_has_exactly_one_winner() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let start = Utc::now();
        store
            .try_acquire("g", "k", "dead-owner", Duration::seconds(5), start)
            .await
            .unwrap();

        let later = start + Duration::seconds(6);
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .try_acquire("g", "k", &format!("owner-{i}"), Duration::seconds(30), later)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_release_requires_matching_token() {
        let store = InMemoryLeaseStore::new();
        let now = Utc::now();
        let first = store
            .try_acquire("g", "k", "a", Duration::seconds(1), now)
            .await
            .unwrap()
            .unwrap();
        let second = store
            .try_acquire("g", "k", "b", Duration::seconds(30), now + Duration::seconds(2))
            .await
            .unwrap()
            .unwrap();

        assert!(!store.release(&first).await.unwrap());
        assert!(store.release(&second).await.unwrap());
        assert!(store.get_lease("g", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_due_records_ordering() {
        let store = InMemoryLeaseStore::new();
        let base = Utc::now() - Duration::minutes(10);

        let mut low_old = IteratorRecord::new("g", "low-old", "acc");
        low_old.created_at = base;
        low_old.next_eligible_at = base;
        let mut high_new = IteratorRecord::new("g", "high-new", "acc");
        high_new.priority = 10;
        high_new.created_at = base + Duration::minutes(5);
        high_new.next_eligible_at = base;
        let mut low_same_a = IteratorRecord::new("g", "low-same-a", "acc");
        low_same_a.created_at = base + Duration::minutes(1);
        low_same_a.next_eligible_at = base;
        let mut low_same_b = low_same_a.clone();
        low_same_b.key = "low-same-b".into();

        for record in [low_same_a, low_old, high_new, low_same_b] {
            store.upsert_record(record).await.unwrap();
        }

        let mut disabled = IteratorRecord::new("g", "disabled", "acc");
        disabled.disabled = true;
        disabled.next_eligible_at = base;
        store.upsert_record(disabled).await.unwrap();
        let mut future = IteratorRecord::new("g", "future", "acc");
        future.next_eligible_at = Utc::now() + Duration::hours(1);
        store.upsert_record(future).await.unwrap();

        let keys: Vec<String> = store
            .due_records("g", Utc::now(), 10)
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.key)
            .collect();
        assert_eq!(keys, vec!["high-new", "low-old", "low-same-a", "low-same-b"]);
    }

    #[tokio::test]
    async fn test_leased_records_are_not_due() {
        let store = InMemoryLeaseStore::new();
        let now = Utc::now();
        let mut record = IteratorRecord::new("g", "k", "acc");
        record.next_eligible_at = now - Duration::seconds(1);
        store.upsert_record(record).await.unwrap();

        store
            .try_acquire("g", "k", "a", Duration::seconds(30), now)
            .await
            .unwrap();
        assert!(store.due_records("g", now, 10).await.unwrap().is_empty());
        assert_eq!(
            store
                .due_records("g", now + Duration::seconds(31), 10)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_upsert_keeps_progress_and_sequence() {
        let store = InMemoryLeaseStore::new();
        let first = store
            .upsert_record(IteratorRecord::new("g", "k", "acc"))
            .await
            .unwrap();
        store
            .update_schedule("g", "k", Utc::now(), 3, true)
            .await
            .unwrap();

        let mut again = IteratorRecord::new("g", "k", "acc");
        again.priority = 7;
        let stored = store.upsert_record(again).await.unwrap();
        assert_eq!(stored.sequence, first.sequence);
        assert_eq!(stored.failed_attempts, 3);
        assert_eq!(stored.priority, 7);

        assert!(store.reset_record("g", "k", Utc::now()).await.unwrap());
        let reset = store.get_record("g", "k").await.unwrap().unwrap();
        assert!(!reset.disabled);
        assert_eq!(reset.failed_attempts, 0);
    }
}
