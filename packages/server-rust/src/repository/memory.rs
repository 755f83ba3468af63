//! In-memory [`ItemRepository`] backed by [`DashMap`].
//!
//! Mirrors the sheet-backed adapter closely enough for tests and local runs:
//! items get a stable physical row on first insert, and a batched write is
//! applied field by field under a single entry guard.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use spoolflow_core::{FieldUpdate, ItemId, StoreError, WorkItem};

use crate::traits::{ItemRepository, WriteAck};

/// First data row of the legacy sheet; row 1 holds the headers.
const FIRST_DATA_ROW: usize = 2;

struct StoredItem {
    row: usize,
    item: WorkItem,
}

pub struct InMemoryItemRepository {
    items: DashMap<ItemId, StoredItem>,
    next_row: AtomicUsize,
    batches: AtomicUsize,
}

impl InMemoryItemRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            next_row: AtomicUsize::new(FIRST_DATA_ROW),
            batches: AtomicUsize::new(0),
        }
    }

    /// Inserts or replaces an item. A replaced item keeps its row.
    pub fn insert(&self, item: WorkItem) {
        match self.items.entry(item.id.clone()) {
            Entry::Occupied(mut occupied) => occupied.get_mut().item = item,
            Entry::Vacant(vacant) => {
                vacant.insert(StoredItem {
                    row: self.next_row.fetch_add(1, Ordering::SeqCst),
                    item,
                });
            }
        }
    }

    /// Synchronous snapshot, for assertions and seeding.
    #[must_use]
    pub fn snapshot(&self, id: &ItemId) -> Option<WorkItem> {
        self.items.get(id).map(|stored| stored.item.clone())
    }

    /// Number of batched writes accepted so far.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for InMemoryItemRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemRepository for InMemoryItemRepository {
    async fn get_by_id(&self, id: &ItemId) -> Result<WorkItem, StoreError> {
        self.snapshot(id).ok_or(StoreError::NotFound)
    }

    async fn batch_update_fields(
        &self,
        id: &ItemId,
        updates: &[FieldUpdate],
    ) -> Result<WriteAck, StoreError> {
        let mut stored = self.items.get_mut(id).ok_or(StoreError::NotFound)?;
        // All or nothing: apply to a copy first.
        let mut next = stored.item.clone();
        for update in updates {
            next.apply(update)
                .map_err(|e| StoreError::Unavailable(format!("rejected write: {e}")))?;
        }
        stored.item = next;
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(WriteAck {
            fields_written: updates.len(),
        })
    }

    async fn find_row(&self, id: &ItemId) -> Result<Option<usize>, StoreError> {
        Ok(self.items.get(id).map(|stored| stored.row))
    }
}

#[cfg(test)]
mod tests {
    use spoolflow_core::{FieldValue, ItemField, UpdateBatch};

    use super::*;

    #[tokio::test]
    async fn rows_are_stable_across_replacement() {
        let repo = InMemoryItemRepository::new();
        repo.insert(WorkItem::new("A"));
        repo.insert(WorkItem::new("B"));
        repo.insert(WorkItem::new("A"));

        assert_eq!(repo.find_row(&ItemId::new("A")).await.unwrap(), Some(2));
        assert_eq!(repo.find_row(&ItemId::new("B")).await.unwrap(), Some(3));
        assert_eq!(repo.find_row(&ItemId::new("C")).await.unwrap(), None);
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn batched_write_is_all_or_nothing() {
        let repo = InMemoryItemRepository::new();
        repo.insert(WorkItem::new("A"));
        let id = ItemId::new("A");

        let bad = UpdateBatch::new()
            .label("half written")
            .set(ItemField::InspectionCycle, FieldValue::Text("nope".into()));
        let err = repo
            .batch_update_fields(&id, bad.updates())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(repo.snapshot(&id).unwrap().status_label, "");
        assert_eq!(repo.batch_count(), 0);

        let ack = repo
            .batch_update_fields(&id, UpdateBatch::new().label("ok").updates())
            .await
            .unwrap();
        assert_eq!(ack.fields_written, 1);
        assert_eq!(repo.snapshot(&id).unwrap().status_label, "ok");
        assert_eq!(repo.batch_count(), 1);
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let repo = InMemoryItemRepository::new();
        let err = repo.get_by_id(&ItemId::new("nope")).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound);
    }
}
