//! Test doubles for the ports.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use spoolflow_core::{FieldUpdate, ItemId, StoreError, WorkItem};

use crate::lock::{ExtendOutcome, LockStore, MemoryLockStore};
use crate::operation::events::{MetadataEntry, OperationEvent};
use crate::repository::InMemoryItemRepository;
use crate::traits::{EventPublisher, ItemRepository, MetadataLogger, WriteAck};

fn unreachable() -> StoreError {
    StoreError::Unavailable("connection refused".into())
}

// ---------------------------------------------------------------------------
// Lock stores
// ---------------------------------------------------------------------------

/// Lock store that cannot be reached at all.
pub struct UnreachableLockStore;

#[async_trait]
impl LockStore for UnreachableLockStore {
    async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> Result<bool, StoreError> {
        Err(unreachable())
    }

    async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
        Err(unreachable())
    }

    async fn persist(&self, _: &str) -> Result<bool, StoreError> {
        Err(unreachable())
    }

    async fn compare_and_delete(&self, _: &str, _: &str) -> Result<bool, StoreError> {
        Err(unreachable())
    }

    async fn compare_and_expire(
        &self,
        _: &str,
        _: &str,
        _: Duration,
    ) -> Result<ExtendOutcome, StoreError> {
        Err(unreachable())
    }

    async fn delete(&self, _: &str) -> Result<bool, StoreError> {
        Err(unreachable())
    }

    async fn keys(&self, _: &str) -> Result<Vec<String>, StoreError> {
        Err(unreachable())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(unreachable())
    }
}

/// Wraps a [`MemoryLockStore`], failing the next `set_if_absent` calls with
/// transport errors, or every `persist`.
pub struct FlakyLockStore {
    inner: MemoryLockStore,
    set_failures: AtomicUsize,
    persist_fails: bool,
}

impl FlakyLockStore {
    pub fn new(inner: MemoryLockStore, set_failures: usize) -> Self {
        Self {
            inner,
            set_failures: AtomicUsize::new(set_failures),
            persist_fails: false,
        }
    }

    pub fn persist_fails(inner: MemoryLockStore) -> Self {
        Self {
            inner,
            set_failures: AtomicUsize::new(0),
            persist_fails: true,
        }
    }

    pub fn failures_left(&self) -> usize {
        self.set_failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockStore for FlakyLockStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let failing = self
            .set_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Transient("connection reset".into()));
        }
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn persist(&self, key: &str) -> Result<bool, StoreError> {
        if self.persist_fails {
            return Err(StoreError::Transient("timeout on PERSIST".into()));
        }
        self.inner.persist(key).await
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        self.inner.compare_and_delete(key, token).await
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        token: &str,
        extra: Duration,
    ) -> Result<ExtendOutcome, StoreError> {
        self.inner.compare_and_expire(key, token, extra).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys(prefix).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

// ---------------------------------------------------------------------------
// Item repositories
// ---------------------------------------------------------------------------

/// Repository that cannot be reached at all.
pub struct UnreachableRepository;

#[async_trait]
impl ItemRepository for UnreachableRepository {
    async fn get_by_id(&self, _: &ItemId) -> Result<WorkItem, StoreError> {
        Err(unreachable())
    }

    async fn batch_update_fields(
        &self,
        _: &ItemId,
        _: &[FieldUpdate],
    ) -> Result<WriteAck, StoreError> {
        Err(unreachable())
    }

    async fn find_row(&self, _: &ItemId) -> Result<Option<usize>, StoreError> {
        Err(unreachable())
    }
}

/// Wraps an [`InMemoryItemRepository`]. Fails the next reads with transient
/// errors, optionally fails every write, and can delay every call.
pub struct FlakyRepository {
    inner: InMemoryItemRepository,
    read_failures: AtomicUsize,
    fail_writes: AtomicBool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FlakyRepository {
    pub fn new(inner: InMemoryItemRepository, read_failures: usize) -> Self {
        Self {
            inner,
            read_failures: AtomicUsize::new(read_failures),
            fail_writes: AtomicBool::new(false),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn slow(inner: InMemoryItemRepository, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(inner, 0)
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `get_by_id` calls seen.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryItemRepository {
        &self.inner
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ItemRepository for FlakyRepository {
    async fn get_by_id(&self, id: &ItemId) -> Result<WorkItem, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let failing = self
            .read_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Transient("quota exceeded, retry later".into()));
        }
        self.inner.get_by_id(id).await
    }

    async fn batch_update_fields(
        &self,
        id: &ItemId,
        updates: &[FieldUpdate],
    ) -> Result<WriteAck, StoreError> {
        self.pause().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("write timed out".into()));
        }
        self.inner.batch_update_fields(id, updates).await
    }

    async fn find_row(&self, id: &ItemId) -> Result<Option<usize>, StoreError> {
        self.inner.find_row(id).await
    }
}

/// Wraps an [`InMemoryItemRepository`]. The first `get_by_id` reads the item
/// and then holds the result back until [`release`](Self::release).
pub struct StallingRepository {
    inner: InMemoryItemRepository,
    stalled: AtomicBool,
    read_taken: Notify,
    gate: Notify,
}

impl StallingRepository {
    pub fn new(inner: InMemoryItemRepository) -> Self {
        Self {
            inner,
            stalled: AtomicBool::new(false),
            read_taken: Notify::new(),
            gate: Notify::new(),
        }
    }

    /// Resolves once the stalled read has taken its snapshot.
    pub async fn stalled_read_taken(&self) {
        self.read_taken.notified().await;
    }

    /// Lets the stalled read return its snapshot.
    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn inner(&self) -> &InMemoryItemRepository {
        &self.inner
    }
}

#[async_trait]
impl ItemRepository for StallingRepository {
    async fn get_by_id(&self, id: &ItemId) -> Result<WorkItem, StoreError> {
        let item = self.inner.get_by_id(id).await;
        if !self.stalled.swap(true, Ordering::SeqCst) {
            self.read_taken.notify_one();
            self.gate.notified().await;
        }
        item
    }

    async fn batch_update_fields(
        &self,
        id: &ItemId,
        updates: &[FieldUpdate],
    ) -> Result<WriteAck, StoreError> {
        self.inner.batch_update_fields(id, updates).await
    }

    async fn find_row(&self, id: &ItemId) -> Result<Option<usize>, StoreError> {
        self.inner.find_row(id).await
    }
}

// ---------------------------------------------------------------------------
// Side channels
// ---------------------------------------------------------------------------

/// Keeps everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<OperationEvent>>,
    pub entries: Mutex<Vec<MetadataEntry>>,
}

#[async_trait]
impl EventPublisher for RecordingSink {
    async fn publish(&self, event: &OperationEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl MetadataLogger for RecordingSink {
    async fn append(&self, entry: &MetadataEntry) -> anyhow::Result<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

/// Fails every call.
pub struct BrokenSink;

#[async_trait]
impl EventPublisher for BrokenSink {
    async fn publish(&self, _: &OperationEvent) -> anyhow::Result<()> {
        anyhow::bail!("event bus offline")
    }
}

#[async_trait]
impl MetadataLogger for BrokenSink {
    async fn append(&self, _: &MetadataEntry) -> anyhow::Result<()> {
        anyhow::bail!("metadata sheet quota exceeded")
    }
}
