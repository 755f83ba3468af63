//! In-memory [`LockStore`] backed by [`DashMap`].
//!
//! Expiry is lazy: an expired entry is treated as absent and removed by the
//! next operation that touches its key. Every method works through a single
//! `DashMap` entry guard, so compare-and-* calls are atomic per key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use spoolflow_core::clock::duration_millis;
use spoolflow_core::{ClockSource, StoreError, SystemClock};

use super::store::{ExtendOutcome, LockStore, LockValue};

#[derive(Debug, Clone)]
struct LockEntry {
    value: String,
    /// `None` for a persistent entry.
    expires_at: Option<u64>,
}

impl LockEntry {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local lock store.
pub struct MemoryLockStore {
    entries: DashMap<String, LockEntry>,
    clock: Arc<dyn ClockSource>,
}

impl MemoryLockStore {
    #[must_use]
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Remaining TTL of `key`. `None` if absent or persistent.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let entry = self.entries.get(key)?;
        match entry.expires_at {
            Some(at) if at > now => Some(Duration::from_millis(at - now)),
            _ => None,
        }
    }

    /// Number of stored entries, expired ones included until swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let fresh = LockEntry {
            value: value.to_string(),
            expires_at: Some(now.saturating_add(duration_millis(ttl))),
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(false);
                }
                occupied.insert(fresh);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        // The read guard must be dropped before `remove_if` takes the shard.
        let live = self
            .entries
            .get(key)
            .map(|entry| entry.is_live(now).then(|| entry.value.clone()));
        match live {
            None => Ok(None),
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove_if(key, |_, e| !e.is_live(now));
                Ok(None)
            }
        }
    }

    async fn persist(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_live(now) {
                    occupied.remove();
                    return Ok(false);
                }
                occupied.get_mut().expires_at = None;
                Ok(true)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let removed = self.entries.remove_if(key, |_, e| {
            e.is_live(now) && LockValue::carries_token(&e.value, token)
        });
        Ok(removed.is_some())
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        token: &str,
        extra: Duration,
    ) -> Result<ExtendOutcome, StoreError> {
        let now = self.clock.now();
        match self.entries.entry(key.to_string()) {
            Entry::Vacant(_) => Ok(ExtendOutcome::Missing),
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_live(now) {
                    occupied.remove();
                    return Ok(ExtendOutcome::Missing);
                }
                let entry = occupied.get_mut();
                if !LockValue::carries_token(&entry.value, token) {
                    return Ok(ExtendOutcome::Mismatch);
                }
                if let Some(at) = entry.expires_at {
                    entry.expires_at = Some(at.saturating_add(duration_millis(extra)));
                }
                Ok(ExtendOutcome::Extended)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now)))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now();
        self.entries.retain(|_, e| e.is_live(now));
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use spoolflow_core::ManualClock;

    use super::*;

    fn store() -> (Arc<ManualClock>, MemoryLockStore) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = MemoryLockStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn set_if_absent_is_exclusive_until_expiry() {
        let (clock, store) = store();
        let ttl = Duration::from_secs(10);
        assert!(store.set_if_absent("lock:A", "1:t1:0", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock:A", "2:t2:0", ttl).await.unwrap());

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.get("lock:A").await.unwrap(), None);
        assert!(store.set_if_absent("lock:A", "2:t2:0", ttl).await.unwrap());
        assert_eq!(store.get("lock:A").await.unwrap().as_deref(), Some("2:t2:0"));
    }

    #[tokio::test]
    async fn persist_survives_the_safety_ttl() {
        let (clock, store) = store();
        store
            .set_if_absent("lock:A", "1:t1:0", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(store.persist("lock:A").await.unwrap());
        assert_eq!(store.ttl("lock:A"), None);

        clock.advance(Duration::from_secs(3_600));
        assert!(store.get("lock:A").await.unwrap().is_some());
        assert!(!store.persist("lock:missing").await.unwrap());
    }

    #[tokio::test]
    async fn compare_and_delete_checks_token() {
        let (_, store) = store();
        store
            .set_if_absent("lock:A", "1:t1:0", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!store.compare_and_delete("lock:A", "t2").await.unwrap());
        assert!(store.get("lock:A").await.unwrap().is_some());
        assert!(store.compare_and_delete("lock:A", "t1").await.unwrap());
        assert!(store.get("lock:A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compare_and_expire_adds_to_remaining_ttl() {
        let (clock, store) = store();
        store
            .set_if_absent("lock:A", "1:t1:0", Duration::from_secs(10))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(4));

        let outcome = store
            .compare_and_expire("lock:A", "t1", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(outcome, ExtendOutcome::Extended);
        assert_eq!(store.ttl("lock:A"), Some(Duration::from_secs(36)));

        let outcome = store
            .compare_and_expire("lock:A", "other", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(outcome, ExtendOutcome::Mismatch);

        let outcome = store
            .compare_and_expire("lock:B", "t1", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(outcome, ExtendOutcome::Missing);
    }

    #[tokio::test]
    async fn keys_skip_expired_entries() {
        let (clock, store) = store();
        store
            .set_if_absent("lock:A", "1:a:0", Duration::from_secs(5))
            .await
            .unwrap();
        store
            .set_if_absent("lock:B", "2:b:0", Duration::from_secs(50))
            .await
            .unwrap();
        store
            .set_if_absent("other:C", "3:c:0", Duration::from_secs(50))
            .await
            .unwrap();

        assert_eq!(store.keys("lock:").await.unwrap(), vec!["lock:A", "lock:B"]);
        clock.advance(Duration::from_secs(5));
        assert_eq!(store.keys("lock:").await.unwrap(), vec!["lock:B"]);
        assert_eq!(store.len(), 2);
    }
}
