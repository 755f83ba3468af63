use async_trait::async_trait;
use serde::Serialize;
use spoolflow_core::{FieldUpdate, ItemId, StoreError, WorkItem};

use crate::operation::events::{MetadataEntry, OperationEvent};

/// Port to the slow, rate-limited backing store that owns work items.
///
/// The lifecycle treats its own batched write as authoritative and never
/// re-reads after writing, since the store may serve stale reads elsewhere.
#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Load the current snapshot of an item.
    async fn get_by_id(&self, id: &ItemId) -> Result<WorkItem, StoreError>;

    /// Write several fields of one item in a single round trip.
    async fn batch_update_fields(
        &self,
        id: &ItemId,
        updates: &[FieldUpdate],
    ) -> Result<WriteAck, StoreError>;

    /// Physical row of the item in the legacy sheet layout, if present.
    async fn find_row(&self, id: &ItemId) -> Result<Option<usize>, StoreError>;
}

/// Acknowledgement of a batched write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteAck {
    pub fields_written: usize,
}

/// Append-only audit log. Best effort: failures never block a transition.
#[async_trait]
pub trait MetadataLogger: Send + Sync {
    async fn append(&self, entry: &MetadataEntry) -> anyhow::Result<()>;
}

/// Change notifications for listeners (dashboards, SSE). Best effort.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OperationEvent) -> anyhow::Result<()>;
}

/// Metadata logger that discards every entry.
pub struct NullMetadataLogger;

#[async_trait]
impl MetadataLogger for NullMetadataLogger {
    async fn append(&self, _entry: &MetadataEntry) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Event publisher that discards every event.
pub struct NullEventPublisher;

#[async_trait]
impl EventPublisher for NullEventPublisher {
    async fn publish(&self, _event: &OperationEvent) -> anyhow::Result<()> {
        Ok(())
    }
}
